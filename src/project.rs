//! Project records and the ordered project list.
//!
//! The list lives in `projects.json` under the app data directory; sessions
//! reference projects by id but never own them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::paths;

const PROJECTS_FILE: &str = "projects.json";

/// One registered project. Immutable after creation except the overall goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub workspace_root: PathBuf,
    pub overall_goal: String,
}

/// Ordered collection of projects, keyed by unique id, persisted as JSON.
pub struct ProjectStore {
    path: PathBuf,
    projects: Vec<Project>,
}

impl ProjectStore {
    /// Load the project list from `app_data_dir/projects.json`. A missing
    /// file is an empty list, not an error.
    pub fn load(app_data_dir: &Path) -> Result<Self> {
        let path = app_data_dir.join(PROJECTS_FILE);
        let projects = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Ok(Self { path, projects })
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.projects)
            .context("failed to serialize project list")?;
        paths::write_atomic(&self.path, &json)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Register a new project. Names must be unique; the workspace root must
    /// be an absolute path.
    pub fn add(
        &mut self,
        name: &str,
        workspace_root: &Path,
        overall_goal: &str,
    ) -> Result<&Project> {
        if name.trim().is_empty() {
            bail!("project name must not be empty");
        }
        if !workspace_root.is_absolute() {
            bail!(
                "workspace root must be an absolute path: {}",
                workspace_root.display()
            );
        }
        if self.projects.iter().any(|p| p.name == name) {
            bail!("a project named '{name}' already exists");
        }

        self.projects.push(Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            workspace_root: workspace_root.to_path_buf(),
            overall_goal: overall_goal.to_string(),
        });
        self.save()?;
        Ok(self.projects.last().expect("just pushed"))
    }

    /// Look a project up by id string or, failing that, by name.
    pub fn find(&self, key: &str) -> Option<&Project> {
        if let Ok(id) = key.parse::<Uuid>() {
            if let Some(p) = self.projects.iter().find(|p| p.id == id) {
                return Some(p);
            }
        }
        self.projects.iter().find(|p| p.name == key)
    }

    /// Update a project's overall goal.
    pub fn set_goal(&mut self, id: Uuid, goal: &str) -> Result<()> {
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .with_context(|| format!("no project with id {id}"))?;
        project.overall_goal = goal.to_string();
        self.save()
    }
}
