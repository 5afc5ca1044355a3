use std::collections::HashMap;

/// First part of the payload: service account, container engine install and
/// remote-API exposure, group and sudoers grants. The agent service below
/// depends on both the account and the reconfigured engine, so this block
/// always renders first.
const SCRIPT_HEADER: &str = r#"#!/bin/bash
useradd -m -d /home/daytona daytona

curl -fsSL https://get.docker.com | bash

# Modify Docker daemon configuration
cat > /etc/docker/daemon.json <<EOF
{
  "hosts": ["unix:///var/run/docker.sock", "tcp://127.0.0.1:2375"]
}
EOF

# Create a systemd drop-in file to modify the Docker service
mkdir -p /etc/systemd/system/docker.service.d
cat > /etc/systemd/system/docker.service.d/override.conf <<EOF
[Service]
ExecStart=
ExecStart=/usr/bin/dockerd
EOF

systemctl daemon-reload
systemctl restart docker
systemctl start docker

usermod -aG docker daytona

if grep -q sudo /etc/group; then
	usermod -aG sudo,docker daytona
elif grep -q wheel /etc/group; then
	usermod -aG wheel,docker daytona
fi

echo "daytona ALL=(ALL) NOPASSWD:ALL" > /etc/sudoers.d/91-daytona

"#;

const AGENT_UNIT_HEAD: &str = r#"
echo '[Unit]
Description=Daytona Agent Service
After=network.target

[Service]
User=daytona
ExecStart=/usr/local/bin/daytona agent --host
Restart=always
"#;

const AGENT_UNIT_TAIL: &str = r#"
[Install]
WantedBy=multi-user.target' > /etc/systemd/system/daytona-agent.service
systemctl daemon-reload
systemctl enable daytona-agent.service
systemctl start daytona-agent.service
"#;

/// Render the first-boot provisioning payload for a workspace host.
///
/// The payload, in order: create the `daytona` service account, install the
/// container engine and expose it on loopback TCP 2375 next to its socket,
/// grant the account group and passwordless-sudo privileges, export every
/// env entry, run the caller-supplied agent install command, and install,
/// enable and start the agent systemd unit with the same env entries as
/// service-level `Environment=` lines.
///
/// Env entries render in sorted key order, so identical inputs always
/// produce byte-identical output. No shell escaping is applied: keys and
/// values containing shell metacharacters corrupt the script, which is a
/// documented boundary contract with the orchestrator.
pub fn render(env_vars: &HashMap<String, String>, agent_install_command: &str) -> String {
    let mut env: Vec<(&str, &str)> = env_vars
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    env.sort();

    let mut script = String::from(SCRIPT_HEADER);
    for (key, value) in &env {
        script.push_str(&format!("export {key}={value}\n"));
    }
    script.push_str(agent_install_command);
    script.push_str(AGENT_UNIT_HEAD);
    for (key, value) in &env {
        script.push_str(&format!("Environment='{key}={value}'\n"));
    }
    script.push_str(AGENT_UNIT_TAIL);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "DAYTONA_AGENT_LOG_FILE_PATH".to_string(),
            "/home/daytona/.daytona-agent.log".to_string(),
        );
        env.insert("DAYTONA_WS_ID".to_string(), "123".to_string());
        env.insert("DAYTONA_SERVER_URL".to_string(), "https://srv".to_string());
        env
    }

    const INSTALL: &str =
        r#"curl -sfL -H "Authorization: Bearer key-123" https://download.example.com | bash"#;

    #[test]
    fn test_render_is_deterministic() {
        // Same entries, different insertion order.
        let env_a = sample_env();
        let mut env_b = HashMap::new();
        env_b.insert("DAYTONA_SERVER_URL".to_string(), "https://srv".to_string());
        env_b.insert("DAYTONA_WS_ID".to_string(), "123".to_string());
        env_b.insert(
            "DAYTONA_AGENT_LOG_FILE_PATH".to_string(),
            "/home/daytona/.daytona-agent.log".to_string(),
        );

        assert_eq!(render(&env_a, INSTALL), render(&env_b, INSTALL));
    }

    #[test]
    fn test_render_sorts_env_exports() {
        let script = render(&sample_env(), INSTALL);
        let log_path = script
            .find("export DAYTONA_AGENT_LOG_FILE_PATH")
            .unwrap();
        let server_url = script.find("export DAYTONA_SERVER_URL").unwrap();
        let ws_id = script.find("export DAYTONA_WS_ID").unwrap();
        assert!(log_path < server_url);
        assert!(server_url < ws_id);
    }

    #[test]
    fn test_render_stage_ordering() {
        let script = render(&sample_env(), INSTALL);

        let useradd = script.find("useradd -m -d /home/daytona daytona").unwrap();
        let docker = script.find("https://get.docker.com").unwrap();
        let daemon_json = script.find("tcp://127.0.0.1:2375").unwrap();
        let exports = script.find("export DAYTONA_AGENT_LOG_FILE_PATH").unwrap();
        let install = script.find("Authorization: Bearer key-123").unwrap();
        let unit = script.find("Description=Daytona Agent Service").unwrap();

        assert!(useradd < docker);
        assert!(docker < daemon_json);
        assert!(daemon_json < exports);
        assert!(exports < install);
        assert!(install < unit);
    }

    #[test]
    fn test_render_unit_carries_env_entries() {
        let script = render(&sample_env(), INSTALL);
        assert!(script.contains("Environment='DAYTONA_WS_ID=123'"));
        assert!(script.contains("Environment='DAYTONA_SERVER_URL=https://srv'"));
        assert!(script.contains("User=daytona"));
        assert!(script.contains("ExecStart=/usr/local/bin/daytona agent --host"));
        assert!(script.contains("systemctl enable daytona-agent.service"));
    }

    #[test]
    fn test_render_grants_and_engine_config() {
        let script = render(&HashMap::new(), INSTALL);
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(r#""hosts": ["unix:///var/run/docker.sock", "tcp://127.0.0.1:2375"]"#));
        assert!(script.contains("usermod -aG docker daytona"));
        assert!(script.contains(r#"echo "daytona ALL=(ALL) NOPASSWD:ALL" > /etc/sudoers.d/91-daytona"#));
    }

    #[tokio::test]
    async fn test_rendered_script_is_valid_shell() {
        let script = render(&sample_env(), INSTALL);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.sh");
        std::fs::write(&path, &script).unwrap();

        let status = match tokio::process::Command::new("bash")
            .arg("-n")
            .arg(&path)
            .status()
            .await
        {
            Ok(status) => status,
            // bash unavailable in this environment
            Err(_) => return,
        };
        assert!(status.success(), "bash -n rejected the rendered script");
    }
}
