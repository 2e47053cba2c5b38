use std::path::{Path, PathBuf};
use stepcore::{FlowError, Graph};

/// Read one graph JSON file.
pub fn load_graph(path: impl AsRef<Path>) -> Result<Graph, FlowError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Graph::from_json(&content)
}

/// Loads every `*.json` graph in a directory
pub struct GraphLoader {
    watch_dir: PathBuf,
}

impl GraphLoader {
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
        }
    }

    /// Graphs sorted by file name. A graph without a `name` is named after
    /// its file stem. Unparseable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Graph>, FlowError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.watch_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension() == Some("json".as_ref()))
            .collect();
        paths.sort();

        let mut graphs = Vec::with_capacity(paths.len());
        for path in paths {
            match load_graph(&path) {
                Ok(mut graph) => {
                    if graph.name.is_none() {
                        graph.name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
                    }
                    tracing::info!("Loaded graph from {}", path.display());
                    graphs.push(graph);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(graphs)
    }
}
