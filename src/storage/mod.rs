use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::Project,
};

const PROJECTS_FILE: &str = "projects.json";
const ACTIVE_INDEX_FILE: &str = "active-project-index";
const DATA_DIR_ENV: &str = "PHOTO_STUDIO_DATA_DIR";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> AppResult<Self> {
        let data_dir = match std::env::var(DATA_DIR_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or_else(|| AppError::msg("failed to resolve a data directory"))?
                .join("photo-studio"),
        };

        Ok(Self { data_dir })
    }
}

/// Durable mirror of the in-memory project list.
pub trait ProjectStore: Send + Sync {
    /// Replaces the whole stored list.
    fn save_all(&self, projects: &[Project]) -> AppResult<()>;
    /// An empty or never-written store yields an empty list.
    fn load_all(&self) -> AppResult<Vec<Project>>;
    fn clear_all(&self) -> AppResult<()>;
    fn save_active_index(&self, index: Option<usize>) -> AppResult<()>;
    fn load_active_index(&self) -> AppResult<Option<usize>>;
}

impl<T: ProjectStore + ?Sized> ProjectStore for Arc<T> {
    fn save_all(&self, projects: &[Project]) -> AppResult<()> {
        (**self).save_all(projects)
    }

    fn load_all(&self) -> AppResult<Vec<Project>> {
        (**self).load_all()
    }

    fn clear_all(&self) -> AppResult<()> {
        (**self).clear_all()
    }

    fn save_active_index(&self, index: Option<usize>) -> AppResult<()> {
        (**self).save_active_index(index)
    }

    fn load_active_index(&self) -> AppResult<Option<usize>> {
        (**self).load_active_index()
    }
}

#[derive(Debug, Clone)]
pub struct JsonProjectStore {
    root: PathBuf,
}

impl JsonProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn open(config: &StoreConfig) -> AppResult<Self> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self::new(config.data_dir.clone()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn projects_path(&self) -> PathBuf {
        self.root.join(PROJECTS_FILE)
    }

    fn active_index_path(&self) -> PathBuf {
        self.root.join(ACTIVE_INDEX_FILE)
    }
}

impl ProjectStore for JsonProjectStore {
    fn save_all(&self, projects: &[Project]) -> AppResult<()> {
        write_json(&self.projects_path(), &projects)?;
        tracing::debug!(count = projects.len(), "saved projects");
        Ok(())
    }

    fn load_all(&self) -> AppResult<Vec<Project>> {
        let path = self.projects_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let stored: Vec<Project> = read_json(&path)?;
        let total = stored.len();
        let projects = stored
            .into_iter()
            .filter(|project| {
                let usable = !project.id.trim().is_empty() && !project.original.bytes.is_empty();
                if !usable {
                    tracing::warn!(id = %project.id, "dropping stored project without an image");
                }
                usable
            })
            .map(normalize_history)
            .collect::<Vec<_>>();

        tracing::info!(loaded = projects.len(), stored = total, "loaded projects");
        Ok(projects)
    }

    fn clear_all(&self) -> AppResult<()> {
        remove_if_exists(&self.projects_path())?;
        remove_if_exists(&self.active_index_path())
    }

    fn save_active_index(&self, index: Option<usize>) -> AppResult<()> {
        match index {
            Some(index) => write_atomic(&self.active_index_path(), index.to_string().as_bytes()),
            None => remove_if_exists(&self.active_index_path()),
        }
    }

    fn load_active_index(&self) -> AppResult<Option<usize>> {
        let path = self.active_index_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        match contents.trim().parse::<usize>() {
            Ok(index) => Ok(Some(index)),
            Err(error) => {
                tracing::warn!(%error, "ignoring unreadable active project index");
                Ok(None)
            }
        }
    }
}

/// Repairs a stored history whose pointers or log no longer line up.
fn normalize_history(mut project: Project) -> Project {
    if project.is_consistent() {
        return project;
    }

    tracing::warn!(id = %project.id, "repairing inconsistent edit history");
    let mut labels = std::mem::take(&mut project.prompt_log).into_iter();
    let mut steps = Vec::new();
    let mut prompt_log = Vec::new();
    for step in std::mem::take(&mut project.edit_steps) {
        let label = labels.next();
        if step.variants.is_empty() {
            continue;
        }
        prompt_log.push(label.unwrap_or_else(|| step.kind.as_label().to_string()));
        steps.push(step);
    }

    project.history_index = steps.len().checked_sub(1);
    project.selected_variant_index = project.history_index.map(|_| 0);
    project.edit_steps = steps;
    project.prompt_log = prompt_log;
    project
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let contents = fs::read_to_string(path)?;
    let value = serde_json::from_str::<T>(&contents)?;
    Ok(value)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let contents = serde_json::to_vec(value)?;
    write_atomic(path, &contents)
}

/// Writes next to `path` and renames over it so readers never see a partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EditKind, EditStep, ImagePayload};

    fn project(name: &str, edits: u8) -> Project {
        let mut project = Project::new(name, ImagePayload::new(vec![0, 1, 2], "image/png"));
        project.source_path = Some(PathBuf::from(format!("/imports/{name}")));
        for tag in 0..edits {
            project.append_edit_step(
                EditStep::single(
                    EditKind::FreeFormEdit,
                    format!("instruction {tag}"),
                    ImagePayload::new(vec![tag, tag], "image/jpeg"),
                ),
                format!("edit {tag}"),
            );
        }
        project
    }

    fn without_transient(projects: &[Project]) -> Vec<Project> {
        projects
            .iter()
            .cloned()
            .map(|mut project| {
                project.source_path = None;
                project
            })
            .collect()
    }

    #[test]
    fn never_written_store_loads_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path().join("missing"));
        assert!(store.load_all()?.is_empty());
        assert_eq!(store.load_active_index()?, None);
        Ok(())
    }

    #[test]
    fn round_trip_zero_one_and_many() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path());

        let mut undone = project("c.jpg", 3);
        undone.undo();
        let lists = vec![
            Vec::new(),
            vec![project("a.png", 0)],
            vec![project("a.png", 2), project("b.webp", 0), undone],
        ];

        for projects in lists {
            store.save_all(&projects)?;
            assert_eq!(store.load_all()?, without_transient(&projects));
        }
        Ok(())
    }

    #[test]
    fn save_replaces_previous_value_without_leftovers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path());
        store.save_all(&[project("a.png", 1), project("b.png", 1)])?;
        store.save_all(&[project("c.png", 0)])?;

        let loaded = store.load_all()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "c.png");

        let leftovers = fs::read_dir(temp.path())?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn active_index_is_a_separate_scalar() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path());

        store.save_active_index(Some(2))?;
        assert_eq!(store.load_active_index()?, Some(2));
        store.save_active_index(None)?;
        assert_eq!(store.load_active_index()?, None);

        fs::write(temp.path().join(ACTIVE_INDEX_FILE), "garbage")?;
        assert_eq!(store.load_active_index()?, None);
        Ok(())
    }

    #[test]
    fn clear_all_removes_everything() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path());
        store.save_all(&[project("a.png", 1)])?;
        store.save_active_index(Some(0))?;

        store.clear_all()?;
        store.clear_all()?;
        assert!(store.load_all()?.is_empty());
        assert_eq!(store.load_active_index()?, None);
        Ok(())
    }

    #[test]
    fn unusable_projects_are_dropped_and_broken_history_repaired() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = JsonProjectStore::new(temp.path());

        let mut empty_image = project("empty.png", 0);
        empty_image.original.bytes.clear();

        let mut broken = project("broken.png", 2);
        broken.history_index = Some(7);
        broken.prompt_log.pop();

        store.save_all(&[empty_image, broken])?;
        let loaded = store.load_all()?;

        assert_eq!(loaded.len(), 1);
        let repaired = &loaded[0];
        assert!(repaired.is_consistent());
        assert_eq!(repaired.history_index, Some(1));
        assert_eq!(repaired.prompt_log, vec!["edit 0", "edit"]);
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join(PROJECTS_FILE), "{ not json")?;
        let store = JsonProjectStore::new(temp.path());
        assert!(matches!(store.load_all(), Err(AppError::Serde(_))));
        Ok(())
    }
}
