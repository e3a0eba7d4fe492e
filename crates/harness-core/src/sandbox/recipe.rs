//! Build recipes synthesised from marker files in a source tree.

use std::path::Path;

/// Name of a user-supplied build recipe in the source root.
pub const BUILD_RECIPE: &str = "Dockerfile";

/// Base runtime chosen from the markers present in a source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Node,
    Python { has_requirements: bool },
    Generic,
}

impl Runtime {
    /// `package.json` selects Node, `pyproject.toml`/`requirements.txt` select
    /// Python; anything else gets a generic image with both toolchains.
    pub fn detect(source: &Path) -> Self {
        if source.join("package.json").is_file() {
            return Runtime::Node;
        }
        let has_requirements = source.join("requirements.txt").is_file();
        if has_requirements || source.join("pyproject.toml").is_file() {
            return Runtime::Python { has_requirements };
        }
        Runtime::Generic
    }

    pub fn base_image(&self) -> &'static str {
        match self {
            Runtime::Node => "node:18-slim",
            Runtime::Python { .. } => "python:3.11-slim",
            Runtime::Generic => "ubuntu:22.04",
        }
    }

    pub fn install_command(&self) -> &'static str {
        match self {
            Runtime::Node => "npm install",
            Runtime::Python {
                has_requirements: true,
            } => "pip install -r requirements.txt",
            Runtime::Python {
                has_requirements: false,
            } => "pip install -e .",
            Runtime::Generic => {
                "apt-get update && apt-get install -y python3 python3-pip nodejs npm"
            }
        }
    }

    pub fn default_command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            Runtime::Node => &["node", "index.js"],
            Runtime::Python { .. } => &["python", "-m", "server"],
            Runtime::Generic => &["python3", "server.py"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }
}

pub fn has_build_recipe(source: &Path) -> bool {
    source.join(BUILD_RECIPE).is_file()
}

/// Render a recipe for `source`. `entry` overrides the runtime's default
/// command.
pub fn synthesize(source: &Path, entry: Option<&[String]>) -> String {
    let runtime = Runtime::detect(source);
    let cmd = match entry {
        Some(argv) if !argv.is_empty() => argv.to_vec(),
        _ => runtime.default_command(),
    };
    // exec form keeps the server as PID 1 with stdin attached
    let cmd_json = serde_json::to_string(&cmd).unwrap_or_else(|_| "[]".to_string());
    format!(
        "FROM {}\n\nWORKDIR /app\nCOPY . .\n\nRUN {}\n\nCMD {}\n",
        runtime.base_image(),
        runtime.install_command(),
        cmd_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        assert_eq!(Runtime::detect(dir.path()), Runtime::Node);
    }

    #[test]
    fn test_detect_python_variants() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        let rt = Runtime::detect(dir.path());
        assert_eq!(rt, Runtime::Python { has_requirements: false });
        assert_eq!(rt.install_command(), "pip install -e .");

        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        let rt = Runtime::detect(dir.path());
        assert_eq!(rt.install_command(), "pip install -r requirements.txt");
    }

    #[test]
    fn test_generic_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = synthesize(dir.path(), None);
        assert!(recipe.starts_with("FROM ubuntu:22.04"));
        assert!(recipe.contains(r#"CMD ["python3","server.py"]"#));
    }

    #[test]
    fn test_entry_overrides_default_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let entry = vec!["npm".to_string(), "start".to_string()];
        let recipe = synthesize(dir.path(), Some(&entry));
        assert!(recipe.contains("FROM node:18-slim"));
        assert!(recipe.contains("RUN npm install"));
        assert!(recipe.contains(r#"CMD ["npm","start"]"#));
        assert!(recipe.contains("WORKDIR /app"));
    }

    #[test]
    fn test_has_build_recipe() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_build_recipe(dir.path()));
        std::fs::write(dir.path().join(BUILD_RECIPE), "FROM scratch").unwrap();
        assert!(has_build_recipe(dir.path()));
    }
}
