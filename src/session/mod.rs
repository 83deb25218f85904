//! Session controller: owns the project list, runs edits through the
//! gateway, and mirrors every committed mutation to the project store.
//!
//! State lives behind a plain mutex that is never held across an await.
//! A per-project busy set keeps at most one edit in flight per project;
//! edits on other projects and history navigation stay available meanwhile.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::{AppError, AppResult},
    gemini::{EditRequest, ImageGateway},
    imaging::{crop_and_resize, export_image_to_path, guess_mime, image_dimensions, ExportQuality},
    mask::MaskCanvas,
    models::{EditIntent, EditOptions, EditStep, ImagePayload, Project, ProjectSummary},
    prompt::{self, Transform},
    storage::ProjectStore,
};

const SAVE_WARNING: &str = "Could not save your projects";
const LOAD_WARNING: &str = "Could not load your saved projects";

#[derive(Debug, Default)]
struct SessionState {
    projects: Vec<Project>,
    active: Option<usize>,
    busy: HashSet<String>,
    banner: Option<String>,
}

impl SessionState {
    fn position(&self, project_id: &str) -> AppResult<usize> {
        self.projects
            .iter()
            .position(|project| project.id == project_id)
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))
    }

    fn find(&self, project_id: &str) -> AppResult<&Project> {
        let index = self.position(project_id)?;
        Ok(&self.projects[index])
    }

    fn find_mut(&mut self, project_id: &str) -> AppResult<&mut Project> {
        let index = self.position(project_id)?;
        Ok(&mut self.projects[index])
    }
}

/// Releases a project's busy mark however the edit ends.
struct BusyGuard<'a> {
    state: &'a Mutex<SessionState>,
    project_id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.busy.remove(&self.project_id);
    }
}

pub struct Session<S, G> {
    store: S,
    gateway: G,
    state: Mutex<SessionState>,
}

impl<S: ProjectStore, G: ImageGateway> Session<S, G> {
    /// Starts with no projects; nothing is read from the store.
    pub fn new(store: S, gateway: G) -> Self {
        Self {
            store,
            gateway,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Restores the stored project list and active pointer. An unreadable
    /// store starts the session empty with a warning banner.
    pub fn open(store: S, gateway: G) -> Self {
        let (projects, banner) = match store.load_all() {
            Ok(projects) => (projects, None),
            Err(error) => {
                tracing::warn!(%error, "failed to load saved projects, starting empty");
                (Vec::new(), Some(format!("{LOAD_WARNING}: {error}")))
            }
        };
        let stored_active = store.load_active_index().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load the active project index");
            None
        });
        let active = match stored_active {
            Some(index) if index < projects.len() => Some(index),
            _ if projects.is_empty() => None,
            _ => Some(0),
        };

        tracing::info!(projects = projects.len(), ?active, "session opened");
        Self {
            store,
            gateway,
            state: Mutex::new(SessionState {
                projects,
                active,
                banner,
                ..SessionState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the in-memory list through. Failures only raise a banner.
    fn persist(&self, state: &mut SessionState) {
        let saved = self
            .store
            .save_all(&state.projects)
            .and_then(|()| self.store.save_active_index(state.active));

        match saved {
            Ok(()) => {
                if state
                    .banner
                    .as_deref()
                    .is_some_and(|banner| banner.starts_with(SAVE_WARNING))
                {
                    state.banner = None;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to persist projects");
                state.banner = Some(format!("{SAVE_WARNING}: {error}"));
            }
        }
    }

    fn mutate<T>(
        &self,
        project_id: &str,
        operation: impl FnOnce(&mut Project) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut state = self.state();
        let value = operation(state.find_mut(project_id)?)?;
        self.persist(&mut state);
        Ok(value)
    }

    pub fn import_path(&self, path: &Path) -> AppResult<ProjectSummary> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        self.add_project(name, bytes, Some(path.to_path_buf()))
    }

    pub fn import_bytes(&self, name: &str, bytes: Vec<u8>) -> AppResult<ProjectSummary> {
        self.add_project(name.to_string(), bytes, None)
    }

    fn add_project(
        &self,
        name: String,
        bytes: Vec<u8>,
        source_path: Option<PathBuf>,
    ) -> AppResult<ProjectSummary> {
        let mime_type = guess_mime(&bytes)?;
        let mut project = Project::new(name, ImagePayload::new(bytes, mime_type));
        project.source_path = source_path;
        let summary = project.to_summary();

        let mut state = self.state();
        state.projects.push(project);
        if state.active.is_none() {
            let active = state.projects.len() - 1;
            state.active = Some(active);
        }
        tracing::info!(id = %summary.id, name = %summary.name, "imported project");
        self.persist(&mut state);
        Ok(summary)
    }

    pub fn summaries(&self) -> Vec<ProjectSummary> {
        self.state()
            .projects
            .iter()
            .map(Project::to_summary)
            .collect()
    }

    pub fn project(&self, project_id: &str) -> AppResult<Project> {
        self.state().find(project_id).cloned()
    }

    pub fn active_project(&self) -> Option<Project> {
        let state = self.state();
        state
            .active
            .and_then(|index| state.projects.get(index))
            .cloned()
    }

    pub fn active_project_id(&self) -> AppResult<String> {
        let state = self.state();
        state
            .active
            .and_then(|index| state.projects.get(index))
            .map(|project| project.id.clone())
            .ok_or(AppError::NoActiveProject)
    }

    pub fn set_active(&self, project_id: &str) -> AppResult<()> {
        let mut state = self.state();
        let index = state.position(project_id)?;
        state.active = Some(index);
        self.persist(&mut state);
        Ok(())
    }

    /// Removes a project. The active project stays active when it survives;
    /// otherwise the pointer moves to the nearest remaining position.
    pub fn delete_project(&self, project_id: &str) -> AppResult<()> {
        let mut state = self.state();
        let removed = state.position(project_id)?;
        let active_id = state
            .active
            .and_then(|index| state.projects.get(index))
            .map(|project| project.id.clone());

        state.projects.remove(removed);
        let remaining = state.projects.len();
        let next = active_id
            .filter(|id| id != project_id)
            .and_then(|id| state.projects.iter().position(|project| project.id == id))
            .or_else(|| (remaining > 0).then(|| removed.min(remaining - 1)));
        state.active = next;

        tracing::info!(id = project_id, active = ?state.active, "deleted project");
        self.persist(&mut state);
        Ok(())
    }

    pub fn clear_all(&self) -> AppResult<()> {
        let mut state = self.state();
        state.projects.clear();
        state.active = None;
        if let Err(error) = self.store.clear_all() {
            tracing::warn!(%error, "failed to clear stored projects");
            state.banner = Some(format!("{SAVE_WARNING}: {error}"));
        }
        Ok(())
    }

    pub fn is_busy(&self, project_id: &str) -> bool {
        self.state().busy.contains(project_id)
    }

    pub fn banner(&self) -> Option<String> {
        self.state().banner.clone()
    }

    pub fn dismiss_banner(&self) {
        self.state().banner = None;
    }

    /// Runs one unmasked edit against the project's active image.
    pub async fn generate(
        &self,
        project_id: &str,
        intent: EditIntent,
    ) -> AppResult<ProjectSummary> {
        if intent.masked {
            return Err(self.fail(AppError::NoMask));
        }
        self.run_edit(project_id, intent, None).await
    }

    /// Runs one edit restricted to the painted area of `mask`, clearing the
    /// surface once the result is committed.
    pub async fn generate_masked<M>(
        &self,
        project_id: &str,
        intent: EditIntent,
        mask: &mut M,
    ) -> AppResult<ProjectSummary>
    where
        M: MaskCanvas + ?Sized,
    {
        let exported = if mask.is_empty() {
            None
        } else {
            mask.export()?
        };
        let Some(mask_png) = exported else {
            return Err(self.fail(AppError::NoMask));
        };

        let image_size = image_dimensions(&self.state().find(project_id)?.active_image().bytes)?;
        let mask_size = image_dimensions(&mask_png)?;
        if mask_size != image_size {
            return Err(self.fail(AppError::MaskSizeMismatch {
                mask: mask_size,
                image: image_size,
            }));
        }

        let summary = self.run_edit(project_id, intent, Some(mask_png)).await?;
        mask.clear();
        Ok(summary)
    }

    pub async fn edit(&self, project_id: &str, options: &EditOptions) -> AppResult<ProjectSummary> {
        let intent = prompt::compose(options)?;
        self.generate(project_id, intent).await
    }

    pub async fn upscale(&self, project_id: &str) -> AppResult<ProjectSummary> {
        self.generate(project_id, prompt::upscale_intent()).await
    }

    pub async fn variation(&self, project_id: &str) -> AppResult<ProjectSummary> {
        self.generate(project_id, prompt::variation_intent()).await
    }

    pub async fn transform(
        &self,
        project_id: &str,
        transform: Transform,
    ) -> AppResult<ProjectSummary> {
        self.generate(project_id, prompt::transform_intent(transform))
            .await
    }

    async fn run_edit(
        &self,
        project_id: &str,
        intent: EditIntent,
        mask: Option<Vec<u8>>,
    ) -> AppResult<ProjectSummary> {
        let source = {
            let mut state = self.state();
            let source = state.find(project_id)?.active_image().clone();
            if !state.busy.insert(project_id.to_string()) {
                return Err(AppError::Busy(project_id.to_string()));
            }
            state.banner = None;
            source
        };
        let _busy = BusyGuard {
            state: &self.state,
            project_id: project_id.to_string(),
        };

        tracing::info!(
            project = project_id,
            kind = intent.kind.as_label(),
            masked = mask.is_some(),
            "generating edit"
        );
        let request = EditRequest {
            image: source,
            instruction: intent.instruction.clone(),
            mask,
        };
        let generated = match self.gateway.generate(request).await {
            Ok(image) => image,
            Err(error) => return Err(self.fail(error.into())),
        };
        let generated = match intent.output_size {
            Some(size) => crop_and_resize(&generated, size).map_err(|error| self.fail(error))?,
            None => generated,
        };

        let mut state = self.state();
        let Ok(project) = state.find_mut(project_id) else {
            tracing::warn!(project = project_id, "project removed during edit, discarding result");
            return Err(AppError::ProjectNotFound(project_id.to_string()));
        };
        project.append_edit_step(
            EditStep::single(intent.kind, intent.instruction, generated),
            intent.label,
        );
        let summary = project.to_summary();
        tracing::info!(
            project = project_id,
            history_index = ?summary.history_index,
            "edit committed"
        );
        self.persist(&mut state);
        Ok(summary)
    }

    fn fail(&self, error: AppError) -> AppError {
        tracing::warn!(%error, "edit failed");
        self.state().banner = Some(error.user_message());
        error
    }

    pub fn undo(&self, project_id: &str) -> AppResult<bool> {
        self.mutate(project_id, |project| Ok(project.undo()))
    }

    pub fn redo(&self, project_id: &str) -> AppResult<bool> {
        self.mutate(project_id, |project| Ok(project.redo()))
    }

    pub fn reset(&self, project_id: &str) -> AppResult<()> {
        self.mutate(project_id, |project| {
            project.reset_all();
            Ok(())
        })
    }

    pub fn select_variant(&self, project_id: &str, variant: usize) -> AppResult<()> {
        self.mutate(project_id, |project| project.select_variant(variant))
    }

    pub fn jump_to(&self, project_id: &str, target: Option<usize>) -> AppResult<()> {
        self.mutate(project_id, |project| project.jump_to(target))
    }

    /// Writes the project's active image at `quality`. Returns the final path.
    pub fn export(
        &self,
        project_id: &str,
        quality: ExportQuality,
        destination: &Path,
    ) -> AppResult<PathBuf> {
        let image = self.state().find(project_id)?.active_image().clone();
        export_image_to_path(&image, quality, destination)
    }
}
