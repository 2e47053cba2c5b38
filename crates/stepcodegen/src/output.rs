use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use stepruntime::EnvVar;

/// File name of the generated entry module.
pub const WORKFLOW_FILE: &str = "workflow.ts";

/// A compiled workflow and everything it needs to run on its own
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledWorkflow {
    /// Exported async function that runs the workflow.
    pub function_name: String,
    /// Entry module.
    pub source: String,
    /// Step implementations keyed by path relative to the entry module.
    pub step_sources: BTreeMap<String, String>,
    /// Package name to version range.
    pub dependencies: BTreeMap<String, String>,
    pub env_vars: Vec<EnvVar>,
}

impl CompiledWorkflow {
    /// `.env.example` listing every variable the program reads.
    pub fn env_example(&self) -> String {
        let mut out = String::new();
        for var in &self.env_vars {
            if !var.description.is_empty() {
                out.push_str(&format!("# {}\n", var.description));
            }
            out.push_str(&format!("{}=\n", var.name));
        }
        out
    }

    pub fn package_json(&self, name: &str) -> String {
        let manifest = json!({
            "name": name,
            "version": "0.1.0",
            "private": true,
            "type": "module",
            "main": WORKFLOW_FILE,
            "scripts": { "typecheck": "tsc --noEmit" },
            "dependencies": self.dependencies,
            "devDependencies": { "@types/node": "^20.0.0", "typescript": "^5.4.0" },
        });
        // A json! value always serializes.
        serde_json::to_string_pretty(&manifest).unwrap_or_default() + "\n"
    }

    /// Every file of the generated project, relative to its root.
    pub fn files(&self, name: &str) -> Vec<(String, String)> {
        let mut files = vec![(WORKFLOW_FILE.to_string(), self.source.clone())];
        files.extend(self.step_sources.iter().map(|(path, src)| (path.clone(), src.clone())));
        files.push(("package.json".to_string(), self.package_json(name)));
        files.push((".env.example".to_string(), self.env_example()));
        files
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> io::Result<()> {
        for (relative, contents) in self.files(name) {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
        tracing::info!(dir = %dir.display(), "Wrote compiled workflow");
        Ok(())
    }
}
