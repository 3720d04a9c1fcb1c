// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! JSON-RPC monitor feeding the table cache.
//!
//! Speaks the database's monitor protocol over TCP or a unix socket:
//! one `monitor` call selecting the tables of interest, then a stream of
//! `update` notifications. Row deltas are applied to the shared
//! [`TableCache`] and classified into [`Event`]s; `echo` keepalives are
//! answered in place.

use crate::cache::TableCache;
use crate::event::{Event, classify_insert, classify_remove, classify_update};
use crate::row::{PortKind, PortRow};
use crate::SouthboundError;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const DATABASE: &str = "OVN_Southbound";
const MONITOR_ID: u64 = 1;
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Name of the table missing from old control-plane schemas.
pub const CHASSIS_PRIVATE: &str = "Chassis_Private";

const PORT_BINDING_COLUMNS: [&str; 8] = [
    "logical_port",
    "type",
    "datapath",
    "chassis",
    "mac",
    "nat_addresses",
    "options",
    "tag",
];

/// A running southbound connection.
pub struct Monitor {
    /// The cache the connection keeps current.
    pub cache: Arc<TableCache>,
    /// Classified row events, in delivery order.
    pub events: mpsc::Receiver<Event>,
    /// The reader task; aborts with the connection.
    pub task: tokio::task::JoinHandle<()>,
}

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

async fn dial(remote: &str) -> Result<Box<dyn AsyncReadWrite>, SouthboundError> {
    if let Some(addr) = remote.strip_prefix("tcp:") {
        return Ok(Box::new(TcpStream::connect(addr).await?));
    }
    if let Some(path) = remote.strip_prefix("unix:") {
        return Ok(Box::new(UnixStream::connect(path).await?));
    }
    Err(SouthboundError::BadRemote(remote.to_string()))
}

/// Connect to the southbound database and start monitoring.
///
/// `with_chassis_private` selects whether the optional `Chassis_Private`
/// table is part of the monitor request; old schemas reject it and the
/// call fails with [`SouthboundError::SchemaMismatch`] so the caller can
/// retry without it.
pub async fn connect(
    remote: &str,
    chassis: &str,
    tenant_events: bool,
    with_chassis_private: bool,
) -> Result<Monitor, SouthboundError> {
    let stream = dial(remote).await?;
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = JsonReader::new(read_half);

    let mut tables = json!({
        "Port_Binding": [{"columns": PORT_BINDING_COLUMNS}],
        "Chassis": [{"columns": ["name"]}],
    });
    if with_chassis_private {
        tables[CHASSIS_PRIVATE] = json!([{"columns": ["name"]}]);
    }
    let request = json!({
        "id": MONITOR_ID,
        "method": "monitor",
        "params": [DATABASE, Value::Null, tables],
    });
    write_half.write_all(&serde_json::to_vec(&request)?).await?;

    // Wait for the monitor reply; keepalives may interleave.
    let initial = loop {
        let message = reader.next_value().await?;
        if message.get("id").and_then(Value::as_u64) == Some(MONITOR_ID) {
            match message.get("error") {
                Some(err) if !err.is_null() => {
                    return Err(SouthboundError::SchemaMismatch(CHASSIS_PRIVATE.to_string()));
                }
                _ => break message.get("result").cloned().unwrap_or(Value::Null),
            }
        }
        answer_echo(&mut write_half, &message).await?;
    };

    let cache = Arc::new(TableCache::new());
    // The initial dump seeds the cache silently; the startup sync walks
    // it, so replaying it as events would only double the work.
    apply_table_updates(&cache, &initial, chassis, tenant_events);

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let task_cache = cache.clone();
    let chassis = chassis.to_string();
    let task = tokio::spawn(async move {
        if let Err(err) = run(reader, write_half, task_cache, tx, &chassis, tenant_events).await {
            error!("southbound monitor stopped: {err}");
        }
    });

    Ok(Monitor {
        cache,
        events: rx,
        task,
    })
}

async fn run(
    mut reader: JsonReader<tokio::io::ReadHalf<Box<dyn AsyncReadWrite>>>,
    mut writer: tokio::io::WriteHalf<Box<dyn AsyncReadWrite>>,
    cache: Arc<TableCache>,
    tx: mpsc::Sender<Event>,
    chassis: &str,
    tenant_events: bool,
) -> Result<(), SouthboundError> {
    loop {
        let message = reader.next_value().await?;
        if answer_echo(&mut writer, &message).await? {
            continue;
        }
        if message.get("method").and_then(Value::as_str) != Some("update") {
            debug!("ignoring southbound message: {message}");
            continue;
        }
        let Some(updates) = message.get("params").and_then(|p| p.get(1)) else {
            warn!("malformed update notification: {message}");
            continue;
        };
        for event in apply_table_updates(&cache, updates, chassis, tenant_events) {
            if tx.send(event).await.is_err() {
                // Receiver gone; the agent is shutting down.
                return Ok(());
            }
        }
    }
}

async fn answer_echo(
    writer: &mut (impl AsyncWrite + Unpin),
    message: &Value,
) -> Result<bool, SouthboundError> {
    if message.get("method").and_then(Value::as_str) != Some("echo") {
        return Ok(false);
    }
    let reply = json!({
        "id": message.get("id").cloned().unwrap_or(Value::Null),
        "result": message.get("params").cloned().unwrap_or_else(|| json!([])),
        "error": Value::Null,
    });
    writer.write_all(&serde_json::to_vec(&reply)?).await?;
    Ok(true)
}

/// Apply one table-updates object to the cache, returning the events it
/// implies. Chassis rows are applied first so port rows resolve their
/// chassis references within the same batch.
pub fn apply_table_updates(
    cache: &TableCache,
    updates: &Value,
    chassis: &str,
    tenant_events: bool,
) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(tables) = updates.as_object() else {
        return events;
    };

    if let Some(rows) = tables.get("Chassis").and_then(Value::as_object) {
        for (uuid, delta) in rows {
            match delta.get("new") {
                Some(new) if !new.is_null() => {
                    let Some(name) = new.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let created = delta.get("old").is_none();
                    cache.upsert_chassis(uuid, name);
                    if created && name == chassis {
                        events.push(Event::ChassisCreated {
                            chassis: name.to_string(),
                        });
                    }
                }
                _ => cache.remove_chassis(uuid),
            }
        }
    }

    if let Some(rows) = tables.get("Port_Binding").and_then(Value::as_object) {
        for (uuid, delta) in rows {
            let new = delta.get("new").filter(|v| !v.is_null());
            match new {
                Some(new) => {
                    let row = port_row(uuid, new, cache);
                    let old = cache.upsert_port(row.clone());
                    match old {
                        None => events.extend(classify_insert(&row, chassis, tenant_events)),
                        Some(old) => {
                            events.extend(classify_update(&old, &row, chassis, tenant_events));
                        }
                    }
                }
                None => {
                    if let Some(old) = cache.remove_port(uuid) {
                        events.extend(classify_remove(&old, chassis, tenant_events));
                    }
                }
            }
        }
    }

    events
}

fn port_row(uuid: &str, columns: &Value, cache: &TableCache) -> PortRow {
    PortRow {
        uuid: uuid.to_string(),
        logical_port: string_column(columns.get("logical_port")),
        kind: PortKind::from(string_column(columns.get("type"))),
        datapath: uuid_column(columns.get("datapath")).unwrap_or_default(),
        chassis: uuid_column(columns.get("chassis")).and_then(|c| cache.chassis_name(&c)),
        mac: set_column(columns.get("mac")),
        nat_addresses: set_column(columns.get("nat_addresses")),
        options: map_column(columns.get("options")),
        tag: int_column(columns.get("tag")),
    }
}

// The wire format wraps compound values: uuids as ["uuid", "…"], sets as
// ["set", […]], maps as ["map", [[k, v]…]]; single-element sets collapse
// to the bare value.

fn string_column(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_default()
}

fn uuid_column(value: Option<&Value>) -> Option<String> {
    let value = value?;
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    let pair = value.as_array()?;
    if pair.first()?.as_str()? != "uuid" {
        return None;
    }
    pair.get(1)?.as_str().map(ToString::to_string)
}

fn set_column(value: Option<&Value>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    if let Some(s) = value.as_str() {
        return vec![s.to_string()];
    }
    let Some(pair) = value.as_array() else {
        return Vec::new();
    };
    if pair.first().and_then(Value::as_str) != Some("set") {
        return Vec::new();
    }
    pair.get(1)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn map_column(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Some(pair) = value.and_then(Value::as_array) else {
        return map;
    };
    if pair.first().and_then(Value::as_str) != Some("map") {
        return map;
    }
    let Some(entries) = pair.get(1).and_then(Value::as_array) else {
        return map;
    };
    for entry in entries {
        let Some(kv) = entry.as_array() else {
            continue;
        };
        if let (Some(k), Some(v)) = (
            kv.first().and_then(Value::as_str),
            kv.get(1).and_then(Value::as_str),
        ) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

fn int_column(value: Option<&Value>) -> Option<u16> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        return u16::try_from(n).ok();
    }
    // single-element integer set
    let pair = value.as_array()?;
    if pair.first()?.as_str()? != "set" {
        return None;
    }
    pair.get(1)?
        .as_array()?
        .first()?
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
}

struct JsonReader<R> {
    reader: R,
    buf: Vec<u8>,
    consumed: usize,
}

impl<R: AsyncRead + Unpin> JsonReader<R> {
    fn new(reader: R) -> Self {
        JsonReader {
            reader,
            buf: Vec::with_capacity(16 * 1024),
            consumed: 0,
        }
    }

    /// Next complete JSON value off the stream. Messages are not
    /// delimited, so partial reads accumulate until a value parses.
    async fn next_value(&mut self) -> Result<Value, SouthboundError> {
        loop {
            if self.consumed > 0 {
                self.buf.drain(..self.consumed);
                self.consumed = 0;
            }
            if !self.buf.is_empty() {
                let mut stream =
                    serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => {
                        self.consumed = stream.byte_offset();
                        return Ok(value);
                    }
                    Some(Err(err)) if err.is_eof() => {}
                    Some(Err(err)) => return Err(SouthboundError::Protocol(err.to_string())),
                    None => {}
                }
            }
            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(SouthboundError::Protocol(
                    "connection closed by peer".to_string(),
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl From<serde_json::Error> for SouthboundError {
    fn from(err: serde_json::Error) -> Self {
        SouthboundError::Protocol(err.to_string())
    }
}
