use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::warn;

use crate::types::ContainerName;

/// Metadata describing one container image, as reported by `list`.
/// Targets have no identity beyond their name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub architecture: String,
    #[serde(default)]
    pub distribution: String,
    #[serde(default)]
    pub version: String,
}

/// Parse the `list` output. Entries missing `name` or `architecture`
/// are skipped; anything that is not a JSON array yields no targets.
pub fn parse_target_list(raw: &str) -> Vec<Target> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!("target list is not valid JSON: {err}");
            return Vec::new();
        }
    };

    let Some(entries) = value.as_array() else {
        warn!("target list is not a JSON array");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect()
}

/// A target architecture can be used on this host when both are equal or
/// when the host can execute the 32-bit variant directly. This is a
/// one-directional 32/64-bit table, not general triplet matching.
pub fn compatible_with_host(host: &str, target: &str) -> bool {
    target == host
        || (host == "i686" && target == "i386")
        || (host == "i386" && target == "i686")
        || (host == "x86_64" && target == "i686")
        || (host == "x86_64" && target == "i386")
}

pub(crate) fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Find an executable on PATH.
pub fn locate_in_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Find one of the SDK tools: PATH first, then the directory of the
/// running agent binary.
pub fn locate(name: &str) -> Option<PathBuf> {
    if let Some(found) = locate_in_path(name) {
        return Some(found);
    }

    let exe = env::current_exe().ok()?;
    let candidate = exe.parent()?.join(name);
    if is_executable(&candidate) {
        return Some(candidate);
    }

    None
}

/// Query/command facade over the external target tool.
///
/// Every operation spawns the tool, waits up to a fixed timeout and
/// degrades to an empty/false result on any failure; callers must treat
/// absent results as "currently unknown". Container metadata that cannot
/// change while the process runs (rootfs path, default user, host
/// architecture) is memoized and never re-queried.
pub struct TargetTool {
    program: PathBuf,
    timeout: Duration,
    base_paths: Mutex<HashMap<ContainerName, String>>,
    users: Mutex<HashMap<ContainerName, String>>,
    host_arch: Mutex<Option<String>>,
}

impl TargetTool {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self {
            program,
            timeout,
            base_paths: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            host_arch: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run_program(
        &self,
        program: impl AsRef<OsStr>,
        args: &[&str],
    ) -> Option<std::process::Output> {
        let program = program.as_ref();
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(err)) => {
                warn!("failed to run {}: {err}", program.to_string_lossy());
                None
            }
            Err(_) => {
                warn!("{} did not return in time", program.to_string_lossy());
                None
            }
        }
    }

    async fn run(&self, args: &[&str]) -> Option<std::process::Output> {
        self.run_program(&self.program, args).await
    }

    /// Root filesystem path of a container, or empty when unknown.
    pub async fn base_path(&self, name: &ContainerName) -> String {
        if let Some(hit) = self
            .base_paths
            .lock()
            .expect("base path cache poisoned")
            .get(name)
        {
            return hit.clone();
        }

        let Some(output) = self.run(&["rootfs", name.as_str()]).await else {
            return String::new();
        };
        if !output.status.success() {
            return String::new();
        }

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        self.base_paths
            .lock()
            .expect("base path cache poisoned")
            .insert(name.clone(), path.clone());
        path
    }

    /// Default login user of a container, or empty when unknown.
    pub async fn default_user(&self, name: &ContainerName) -> String {
        if let Some(hit) = self.users.lock().expect("user cache poisoned").get(name) {
            return hit.clone();
        }

        let Some(output) = self.run(&["username", name.as_str()]).await else {
            return String::new();
        };
        if !output.status.success() {
            return String::new();
        }

        let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
        self.users
            .lock()
            .expect("user cache poisoned")
            .insert(name.clone(), user.clone());
        user
    }

    /// Check whether the named target still exists.
    pub async fn exists(&self, name: &ContainerName) -> bool {
        match self.run(&["exists", name.as_str()]).await {
            Some(output) => output.status.success(),
            None => false,
        }
    }

    /// All currently existing container targets on this system.
    pub async fn list(&self) -> Vec<Target> {
        let Some(output) = self.run(&["list"]).await else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }

        parse_target_list(&String::from_utf8_lossy(&output.stdout))
    }

    /// Targets whose architecture can run directly on this host, and can
    /// therefore back a local container device.
    pub async fn device_targets(&self) -> Vec<Target> {
        let host = self.host_architecture().await;
        if host.is_empty() {
            return Vec::new();
        }

        self.list()
            .await
            .into_iter()
            .filter(|target| compatible_with_host(&host, &target.architecture))
            .collect()
    }

    pub async fn set_upgrades_enabled(&self, name: &ContainerName, enabled: bool) -> bool {
        let mode = if enabled {
            "upgrades-enabled"
        } else {
            "upgrades-disabled"
        };
        match self.run(&["set", name.as_str(), mode]).await {
            Some(output) => output.status.success(),
            None => false,
        }
    }

    /// Machine architecture of the host, via `uname -m`. Memoized for the
    /// process lifetime; empty when it cannot be determined.
    pub async fn host_architecture(&self) -> String {
        if let Some(arch) = self
            .host_arch
            .lock()
            .expect("host arch cache poisoned")
            .clone()
        {
            return arch;
        }

        let Some(output) = self.run_program("uname", &["-m"]).await else {
            warn!("could not determine the host architecture");
            return String::new();
        };
        if !output.status.success() {
            warn!("could not determine the host architecture");
            return String::new();
        }

        let arch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        *self.host_arch.lock().expect("host arch cache poisoned") = Some(arch.clone());
        arch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn fake_tool(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("lmsdk-target");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn tool(program: PathBuf) -> TargetTool {
        TargetTool::new(program, Duration::from_secs(3))
    }

    #[test]
    fn architecture_compatibility_table() {
        assert!(compatible_with_host("x86_64", "x86_64"));
        assert!(compatible_with_host("x86_64", "i386"));
        assert!(compatible_with_host("x86_64", "i686"));
        assert!(compatible_with_host("i686", "i386"));
        assert!(compatible_with_host("i386", "i686"));
        assert!(compatible_with_host("armhf", "armhf"));

        assert!(!compatible_with_host("x86_64", "armhf"));
        assert!(!compatible_with_host("i386", "x86_64"));
        assert!(!compatible_with_host("armhf", "i386"));
    }

    #[test]
    fn list_parsing_skips_incomplete_entries() {
        let targets =
            parse_target_list(r#"[{"name":"a","architecture":"i386"},{"name":"b"}]"#);
        assert_eq!(
            targets,
            vec![Target {
                name: "a".to_string(),
                architecture: "i386".to_string(),
                distribution: String::new(),
                version: String::new(),
            }]
        );
    }

    #[test]
    fn list_parsing_keeps_optional_fields() {
        let targets = parse_target_list(
            r#"[{"name":"ivi","architecture":"i386","distribution":"ubuntu","version":"16.04"}]"#,
        );
        assert_eq!(targets[0].distribution, "ubuntu");
        assert_eq!(targets[0].version, "16.04");
    }

    #[test]
    fn list_parsing_degrades_to_empty() {
        assert_eq!(parse_target_list("not json"), Vec::new());
        assert_eq!(parse_target_list(r#"{"name":"a"}"#), Vec::new());
        assert_eq!(parse_target_list("[]"), Vec::new());
    }

    #[tokio::test]
    async fn base_path_is_trimmed_and_cached() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("calls");
        let program = fake_tool(
            &dir,
            &format!(
                r#"echo run >> "{}"
[ "$1" = rootfs ] || exit 1
echo "  /var/lib/lmsdk/containers/$2/rootfs  ""#,
                counter.display()
            ),
        );

        let tool = tool(program);
        let name = ContainerName::from("ivi");
        let first = tool.base_path(&name).await;
        let second = tool.base_path(&name).await;

        assert_eq!(first, "/var/lib/lmsdk/containers/ivi/rootfs");
        assert_eq!(second, first);
        // second call must be served from the cache
        let calls = fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[tokio::test]
    async fn default_user_is_cached_per_name() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("calls");
        let program = fake_tool(
            &dir,
            &format!(
                r#"echo "$2" >> "{}"
[ "$1" = username ] || exit 1
echo "dev-$2""#,
                counter.display()
            ),
        );

        let tool = tool(program);
        assert_eq!(tool.default_user(&ContainerName::from("a")).await, "dev-a");
        assert_eq!(tool.default_user(&ContainerName::from("a")).await, "dev-a");
        assert_eq!(tool.default_user(&ContainerName::from("b")).await, "dev-b");

        let calls = fs::read_to_string(&counter).unwrap();
        assert_eq!(calls, "a\nb\n");
    }

    #[tokio::test]
    async fn failed_queries_degrade_to_empty_and_are_not_cached() {
        let dir = TempDir::new().unwrap();
        let program = fake_tool(&dir, "exit 1");

        let tool = tool(program);
        let name = ContainerName::from("gone");
        assert_eq!(tool.base_path(&name).await, "");
        assert_eq!(tool.default_user(&name).await, "");
        assert!(tool.base_paths.lock().unwrap().is_empty());
        assert!(tool.users.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_program_degrades_to_empty() {
        let tool = tool(PathBuf::from("/nonexistent/lmsdk-target"));
        assert_eq!(tool.base_path(&ContainerName::from("a")).await, "");
        assert!(!tool.exists(&ContainerName::from("a")).await);
        assert_eq!(tool.list().await, Vec::new());
    }

    #[tokio::test]
    async fn slow_tool_times_out_to_empty() {
        let dir = TempDir::new().unwrap();
        let program = fake_tool(&dir, "sleep 1\necho should-not-arrive");

        let tool = TargetTool::new(program, Duration::from_millis(100));
        assert_eq!(tool.base_path(&ContainerName::from("slow")).await, "");
    }

    #[tokio::test]
    async fn exists_follows_the_exit_code() {
        let dir = TempDir::new().unwrap();
        let program = fake_tool(&dir, r#"[ "$2" = "there" ] || exit 3"#);

        let tool = tool(program);
        assert!(tool.exists(&ContainerName::from("there")).await);
        assert!(!tool.exists(&ContainerName::from("missing")).await);
    }

    #[tokio::test]
    async fn set_upgrades_passes_the_mode_argument() {
        let dir = TempDir::new().unwrap();
        let program = fake_tool(
            &dir,
            r#"[ "$1" = set ] || exit 1
[ "$2" = ivi ] || exit 1
[ "$3" = upgrades-disabled ] || exit 1"#,
        );

        let tool = tool(program);
        assert!(
            tool.set_upgrades_enabled(&ContainerName::from("ivi"), false)
                .await
        );
        assert!(
            !tool
                .set_upgrades_enabled(&ContainerName::from("ivi"), true)
                .await
        );
    }

    #[tokio::test]
    async fn device_targets_filters_by_host_architecture() {
        let dir = TempDir::new().unwrap();
        // host arch is whatever `uname -m` reports here, so emit one entry
        // matching it and one that can never match
        let host = String::from_utf8(
            std::process::Command::new("uname")
                .arg("-m")
                .output()
                .unwrap()
                .stdout,
        )
        .unwrap()
        .trim()
        .to_string();
        let program = fake_tool(
            &dir,
            &format!(
                r#"[ "$1" = list ] || exit 1
echo '[{{"name":"native","architecture":"{host}"}},{{"name":"foreign","architecture":"m68k"}}]'"#
            ),
        );

        let tool = tool(program);
        let targets = tool.device_targets().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "native");
    }

    #[tokio::test]
    async fn host_architecture_is_memoized() {
        let dir = TempDir::new().unwrap();
        let tool = tool(fake_tool(&dir, "exit 1"));

        let first = tool.host_architecture().await;
        assert!(!first.is_empty());
        assert_eq!(tool.host_architecture().await, first);
    }

    #[test]
    fn locate_finds_executables_on_path() {
        assert!(locate_in_path("sh").is_some());
        assert!(locate_in_path("definitely-not-a-real-tool-4711").is_none());
    }
}
