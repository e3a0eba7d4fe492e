//! Source path and launch command resolution for one run.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::domain::{RunOverrides, TargetMetadata};
use crate::sandbox::SandboxConfig;

/// Local checkout of `name`: explicit `local_path`, then
/// `<repos_dir>/<name>`, then `<repos_dir>/<repo basename>`.
pub fn resolve_source(name: &str, meta: Option<&TargetMetadata>, repos_dir: &Path) -> Option<PathBuf> {
    let explicit = meta.and_then(|m| m.local_path.clone());
    let by_name = Some(repos_dir.join(name));
    let by_repo = meta
        .and_then(|m| m.repo_url.as_deref())
        .and_then(repo_basename)
        .map(|base| repos_dir.join(base));

    [explicit, by_name, by_repo]
        .into_iter()
        .flatten()
        .find(|p| p.is_dir())
}

fn repo_basename(url: &str) -> Option<&str> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    let base = last.strip_suffix(".git").unwrap_or(last);
    (!base.is_empty()).then_some(base)
}

fn has_start_script(package_json: &Path) -> bool {
    std::fs::read(package_json)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|v| v.pointer("/scripts/start").cloned())
        .is_some()
}

/// Guess the stdio server command from marker files. Never fails; an
/// unrecognised tree falls back to `python server.py`.
pub fn auto_detect(source: &Path) -> (String, Vec<String>) {
    let cmd = |c: &str, args: &[&str]| -> (String, Vec<String>) {
        (c.to_string(), args.iter().map(|a| a.to_string()).collect())
    };

    if source.join("server.py").is_file() {
        return cmd("python", &["server.py"]);
    }
    if source.join("index.js").is_file() {
        return cmd("node", &["index.js"]);
    }
    if source.join("index.ts").is_file() {
        return cmd("npx", &["tsx", "index.ts"]);
    }
    if source.join("src").join("index.ts").is_file() {
        return cmd("npm", &["start"]);
    }
    let package_json = source.join("package.json");
    if package_json.is_file() {
        return if has_start_script(&package_json) {
            cmd("npm", &["start"])
        } else {
            cmd("node", &["index.js"])
        };
    }
    if source.join("pyproject.toml").is_file() {
        return cmd("python", &["-m", "server"]);
    }
    cmd("python", &["server.py"])
}

/// Build the sandbox configuration for one run.
///
/// `None` when there is neither a local source nor an image to pull.
pub fn resolve_launch(
    name: &str,
    meta: Option<&TargetMetadata>,
    overrides: &RunOverrides,
    config: &HarnessConfig,
) -> Option<SandboxConfig> {
    let image = overrides
        .image
        .clone()
        .or_else(|| meta.and_then(|m| m.image_reference.clone()));
    let source = resolve_source(name, meta, &config.repos_dir);
    if source.is_none() && image.is_none() {
        return None;
    }
    let source_path = source.clone().unwrap_or_else(|| config.repos_dir.join(name));

    let (command, mut args) = match (&overrides.command, meta.and_then(|m| m.command.clone())) {
        (Some(cmd), _) => (Some(cmd.clone()), Vec::new()),
        (None, Some(cmd)) => (Some(cmd), meta.map(|m| m.args.clone()).unwrap_or_default()),
        // A pulled image without a local tree keeps its own entry point.
        (None, None) => match &source {
            Some(dir) => {
                let (cmd, args) = auto_detect(dir);
                debug!(target = %name, command = %cmd, ?args, "auto-detected launch command");
                (Some(cmd), args)
            }
            None => (None, Vec::new()),
        },
    };
    if let Some(override_args) = &overrides.args {
        args = override_args.clone();
    }

    let mut environment = meta.map(TargetMetadata::env_vars).unwrap_or_default();
    environment.extend(overrides.env_vars.clone());

    Some(SandboxConfig {
        source_path,
        image_reference: image,
        entry_command: command,
        entry_args: args,
        environment,
        startup_timeout_secs: overrides
            .startup_timeout_secs
            .unwrap_or(config.startup_timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvValue;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        dir
    }

    fn detect(files: &[&str]) -> (String, Vec<String>) {
        auto_detect(tree(files).path())
    }

    #[test]
    fn test_auto_detect_table() {
        assert_eq!(detect(&["server.py", "index.js"]), ("python".into(), vec!["server.py".into()]));
        assert_eq!(detect(&["index.js"]), ("node".into(), vec!["index.js".into()]));
        assert_eq!(detect(&["index.ts"]).1, vec!["tsx", "index.ts"]);
        assert_eq!(detect(&["src/index.ts"]), ("npm".into(), vec!["start".into()]));
        assert_eq!(detect(&["package.json"]).0, "node");
        assert_eq!(detect(&["pyproject.toml"]).1, vec!["-m", "server"]);
        assert_eq!(detect(&["requirements.txt"]), ("python".into(), vec!["server.py".into()]));
        assert_eq!(detect(&[]), ("python".into(), vec!["server.py".into()]));
    }

    #[test]
    fn test_auto_detect_npm_start_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"start": "node build/index.js"}}"#,
        )
        .unwrap();
        assert_eq!(auto_detect(dir.path()), ("npm".into(), vec!["start".into()]));
    }

    #[test]
    fn test_resolve_source_precedence() {
        let repos = tempfile::tempdir().unwrap();
        std::fs::create_dir(repos.path().join("weather")).unwrap();
        std::fs::create_dir(repos.path().join("mcp-files")).unwrap();

        assert_eq!(
            resolve_source("weather", None, repos.path()),
            Some(repos.path().join("weather"))
        );

        let meta = TargetMetadata {
            repo_url: Some("https://github.com/acme/mcp-files.git".into()),
            ..TargetMetadata::new("files")
        };
        assert_eq!(
            resolve_source("files", Some(&meta), repos.path()),
            Some(repos.path().join("mcp-files"))
        );

        let explicit = tempfile::tempdir().unwrap();
        let meta = TargetMetadata::new("weather").with_local_path(explicit.path());
        assert_eq!(
            resolve_source("weather", Some(&meta), repos.path()),
            Some(explicit.path().to_path_buf())
        );

        assert_eq!(resolve_source("ghost", None, repos.path()), None);
    }

    #[test]
    fn test_repo_basename() {
        assert_eq!(repo_basename("https://github.com/a/b.git"), Some("b"));
        assert_eq!(repo_basename("https://github.com/a/b/"), Some("b"));
        assert_eq!(repo_basename(""), None);
    }

    #[test]
    fn test_resolve_launch_merges_metadata_and_overrides() {
        let src = tree(&["index.js"]);
        let mut meta = TargetMetadata::new("t")
            .with_local_path(src.path())
            .with_command("node", vec!["dist/main.js".into()]);
        meta.env.insert("TOKEN".into(), EnvValue::Wrapped { value: "meta".into() });
        meta.env.insert("REGION".into(), EnvValue::Plain("eu".into()));

        let overrides = RunOverrides {
            env_vars: [("TOKEN".to_string(), "override".to_string())].into(),
            startup_timeout_secs: Some(5),
            ..RunOverrides::default()
        };
        let cfg = resolve_launch("t", Some(&meta), &overrides, &HarnessConfig::default()).unwrap();
        assert_eq!(cfg.entry_argv().unwrap(), vec!["node", "dist/main.js"]);
        assert_eq!(cfg.environment["TOKEN"], "override");
        assert_eq!(cfg.environment["REGION"], "eu");
        assert_eq!(cfg.startup_timeout_secs, 5);
        assert!(cfg.image_reference.is_none());
    }

    #[test]
    fn test_resolve_launch_override_command_replaces_args() {
        let src = tree(&["server.py"]);
        let meta = TargetMetadata::new("t")
            .with_local_path(src.path())
            .with_command("python", vec!["server.py".into()]);
        let overrides = RunOverrides {
            command: Some("uv".into()),
            args: Some(vec!["run".into(), "server.py".into()]),
            ..RunOverrides::default()
        };
        let cfg = resolve_launch("t", Some(&meta), &overrides, &HarnessConfig::default()).unwrap();
        assert_eq!(cfg.entry_argv().unwrap(), vec!["uv", "run", "server.py"]);
    }

    #[test]
    fn test_resolve_launch_auto_detects() {
        let src = tree(&["index.ts"]);
        let meta = TargetMetadata::new("t").with_local_path(src.path());
        let cfg =
            resolve_launch("t", Some(&meta), &RunOverrides::default(), &HarnessConfig::default())
                .unwrap();
        assert_eq!(cfg.entry_argv().unwrap(), vec!["npx", "tsx", "index.ts"]);
        assert_eq!(cfg.startup_timeout_secs, 60);
    }

    #[test]
    fn test_resolve_launch_unresolved() {
        let config = HarnessConfig {
            repos_dir: PathBuf::from("/definitely/not/here"),
            ..HarnessConfig::default()
        };
        assert!(resolve_launch("ghost", None, &RunOverrides::default(), &config).is_none());

        let overrides = RunOverrides {
            image: Some("acme/server:1".into()),
            ..RunOverrides::default()
        };
        let cfg = resolve_launch("ghost", None, &overrides, &config).unwrap();
        assert_eq!(cfg.image_reference.as_deref(), Some("acme/server:1"));
        assert!(cfg.entry_command.is_none());
    }
}
