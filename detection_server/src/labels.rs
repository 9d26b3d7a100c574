use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Labels file {0} contains no class names")]
    Empty(String),
}

/// Class names indexed by the model's class id.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(filepath: &Path) -> Result<Self, LabelsError> {
        let file = File::open(filepath)?;
        let labels = Self::from_reader(io::BufReader::new(file))?;
        if labels.is_empty() {
            return Err(LabelsError::Empty(filepath.display().to_string()));
        }

        tracing::info!("Loaded {} class labels from {:?}", labels.len(), filepath);
        Ok(labels)
    }

    /// One name per line. Lines in the `label,r,g,b` layout keep only the label.
    pub fn from_reader(reader: impl BufRead) -> io::Result<Self> {
        let mut names = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.split(',').next().unwrap_or_default().trim();
            if label.is_empty() {
                continue;
            }
            names.push(label.to_string());
        }

        Ok(Self { names })
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
