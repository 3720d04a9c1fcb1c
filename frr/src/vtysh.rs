// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Wrapper for applying rendered configuration through vtysh.

use crate::renderer::{Render, VrfLeak};
use crate::FrrError;
use tokio::process::Command;
use tracing::info;

/// Leak the VRF into the BGP AS. Called once at startup; the daemon
/// treats a re-application of identical configuration as a no-op.
pub async fn vrf_leak(leak: &VrfLeak, vtysh_bin: &str) -> Result<(), FrrError> {
    let config = leak.render(&()).to_string();
    let staged = std::env::temp_dir().join(format!("herald-vrf-leak-{}.conf", std::process::id()));
    std::fs::write(&staged, &config)?;
    let result = run_vtysh(vtysh_bin, &staged.to_string_lossy()).await;
    let _ = std::fs::remove_file(&staged);
    result?;
    info!("leaked vrf {} into bgp as {}", leak.vrf, leak.bgp_as);
    Ok(())
}

async fn run_vtysh(vtysh_bin: &str, config_file: &str) -> Result<(), FrrError> {
    let command = format!("{vtysh_bin} -f {config_file}");
    let output = Command::new(vtysh_bin)
        .arg("-f")
        .arg(config_file)
        .output()
        .await
        .map_err(|err| FrrError::Spawn {
            command: command.clone(),
            reason: err.to_string(),
        })?;

    if !output.stderr.is_empty() {
        return Err(FrrError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    if !output.status.success() {
        return Err(FrrError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stdout).into_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::InterfaceName;
    use std::os::unix::fs::PermissionsExt;

    fn stub(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("herald-frr-stub-{}-{name}", std::process::id()));
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn leak() -> VrfLeak {
        VrfLeak {
            vrf: InterfaceName::try_from("bgp-vrf").unwrap(),
            bgp_as: 64999,
            router_id: "192.0.2.1".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn vrf_leak_accepts_clean_exit() {
        let bin = stub("pass.sh", "#!/bin/sh\nexit 0\n");
        assert!(vrf_leak(&leak(), &bin.to_string_lossy()).await.is_ok());
        let _ = std::fs::remove_file(bin);
    }

    #[tokio::test]
    async fn vrf_leak_fails_on_errcode() {
        let bin = stub("fail-errcode.sh", "#!/bin/sh\nexit 1\n");
        let result = vrf_leak(&leak(), &bin.to_string_lossy()).await;
        assert!(matches!(result, Err(FrrError::CommandFailed { .. })));
        let _ = std::fs::remove_file(bin);
    }

    #[tokio::test]
    async fn vrf_leak_fails_on_stderr() {
        let bin = stub("fail-stderr.sh", "#!/bin/sh\necho nope >&2\nexit 0\n");
        let result = vrf_leak(&leak(), &bin.to_string_lossy()).await;
        assert!(matches!(result, Err(FrrError::CommandFailed { .. })));
        let _ = std::fs::remove_file(bin);
    }
}
