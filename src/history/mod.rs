//! Branching undo over a project's edit steps.
//!
//! The timeline keeps steps past the history pointer so they can be redone;
//! appending a new step after an undo drops that redo branch. `prompt_log`
//! always has one label per entry in `edit_steps`.

use crate::{
    error::{AppError, AppResult},
    models::{EditStep, ImagePayload, Project},
};

impl Project {
    /// Commits `step` after the current pointer, discarding any redo branch.
    pub fn append_edit_step(&mut self, step: EditStep, label: impl Into<String>) {
        let keep = self.history_index.map_or(0, |index| index + 1);
        self.edit_steps.truncate(keep);
        self.prompt_log.truncate(keep);

        self.edit_steps.push(step);
        self.prompt_log.push(label.into());
        self.history_index = Some(self.edit_steps.len() - 1);
        self.selected_variant_index = Some(0);
    }

    /// Returns false when already showing the original.
    pub fn undo(&mut self) -> bool {
        match self.history_index {
            None => false,
            Some(0) => {
                self.history_index = None;
                self.selected_variant_index = None;
                true
            }
            Some(index) => {
                self.history_index = Some(index - 1);
                self.selected_variant_index = Some(0);
                true
            }
        }
    }

    /// Returns false when the last step is already active.
    pub fn redo(&mut self) -> bool {
        let next = self.history_index.map_or(0, |index| index + 1);
        if next >= self.edit_steps.len() {
            return false;
        }

        self.history_index = Some(next);
        self.selected_variant_index = Some(0);
        true
    }

    pub fn select_variant(&mut self, variant: usize) -> AppResult<()> {
        let len = self.current_step().map_or(0, |step| step.variants.len());
        if variant >= len {
            return Err(AppError::InvalidIndex {
                index: variant,
                len,
            });
        }

        self.selected_variant_index = Some(variant);
        Ok(())
    }

    pub fn reset_all(&mut self) {
        self.edit_steps.clear();
        self.prompt_log.clear();
        self.history_index = None;
        self.selected_variant_index = None;
    }

    /// Moves the pointer straight to `target`; `None` is the original image.
    pub fn jump_to(&mut self, target: Option<usize>) -> AppResult<()> {
        match target {
            None => {
                self.history_index = None;
                self.selected_variant_index = None;
            }
            Some(index) if index < self.edit_steps.len() => {
                self.history_index = Some(index);
                self.selected_variant_index = Some(0);
            }
            Some(index) => {
                return Err(AppError::InvalidIndex {
                    index,
                    len: self.edit_steps.len(),
                });
            }
        }

        Ok(())
    }

    pub fn current_step(&self) -> Option<&EditStep> {
        self.history_index
            .and_then(|index| self.edit_steps.get(index))
    }

    /// The image shown and used as the source of the next edit.
    pub fn active_image(&self) -> &ImagePayload {
        self.current_step()
            .zip(self.selected_variant_index)
            .and_then(|(step, variant)| step.variants.get(variant))
            .unwrap_or(&self.original)
    }

    pub fn can_undo(&self) -> bool {
        self.history_index.is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.history_index.map_or(0, |index| index + 1) < self.edit_steps.len()
    }

    pub fn can_reset(&self) -> bool {
        !self.edit_steps.is_empty()
    }

    /// Checks pointer bounds, non-empty variant lists and the log length.
    pub fn is_consistent(&self) -> bool {
        if self.prompt_log.len() != self.edit_steps.len() {
            return false;
        }
        if self.edit_steps.iter().any(|step| step.variants.is_empty()) {
            return false;
        }

        match (self.history_index, self.selected_variant_index) {
            (None, None) => true,
            (Some(index), Some(variant)) => self
                .edit_steps
                .get(index)
                .is_some_and(|step| variant < step.variants.len()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EditKind;

    fn image(tag: u8) -> ImagePayload {
        ImagePayload::new(vec![tag], "image/jpeg")
    }

    fn step(tag: u8) -> EditStep {
        EditStep::single(EditKind::FreeFormEdit, format!("edit {tag}"), image(tag))
    }

    fn project() -> Project {
        Project::new("house.jpg", image(0))
    }

    fn tags(project: &Project) -> Vec<u8> {
        project
            .edit_steps
            .iter()
            .map(|step| step.variants[0].bytes[0])
            .collect()
    }

    #[test]
    fn new_project_shows_original() {
        let project = project();
        assert_eq!(project.history_index, None);
        assert_eq!(project.selected_variant_index, None);
        assert_eq!(project.active_image(), &image(0));
        assert!(project.is_consistent());
    }

    #[test]
    fn append_after_undo_discards_redo_branch() {
        let mut project = project();
        project.append_edit_step(step(1), "A");
        project.append_edit_step(step(2), "B");
        assert!(project.undo());
        assert_eq!(project.history_index, Some(0));

        project.append_edit_step(step(3), "C");
        assert_eq!(tags(&project), vec![1, 3]);
        assert_eq!(project.prompt_log, vec!["A", "C"]);
        assert_eq!(project.history_index, Some(1));
        assert_eq!(project.selected_variant_index, Some(0));
    }

    #[test]
    fn undo_to_original_then_edit_replaces_everything() {
        let mut project = project();
        project.append_edit_step(step(1), "A");
        assert_eq!(project.active_image(), &image(1));

        assert!(project.undo());
        assert_eq!(project.history_index, None);
        assert_eq!(project.selected_variant_index, None);
        assert_eq!(project.active_image(), &image(0));

        project.append_edit_step(step(2), "B");
        assert_eq!(tags(&project), vec![2]);
        assert_eq!(project.history_index, Some(0));
    }

    #[test]
    fn undo_and_redo_stop_at_the_ends() {
        let mut project = project();
        assert!(!project.undo());
        assert!(!project.redo());

        project.append_edit_step(step(1), "A");
        project.append_edit_step(step(2), "B");
        assert!(!project.redo());
        assert_eq!(project.history_index, Some(1));

        assert!(project.undo());
        assert!(project.undo());
        assert!(!project.undo());
        assert_eq!(project.history_index, None);

        assert!(project.redo());
        assert_eq!(project.history_index, Some(0));
        assert_eq!(project.selected_variant_index, Some(0));
        assert_eq!(tags(&project), vec![1, 2]);
    }

    #[test]
    fn reset_clears_from_any_state() {
        let mut project = project();
        project.reset_all();
        assert!(project.edit_steps.is_empty());

        project.append_edit_step(step(1), "A");
        project.append_edit_step(step(2), "B");
        project.undo();
        project.reset_all();
        assert!(project.edit_steps.is_empty());
        assert!(project.prompt_log.is_empty());
        assert_eq!(project.history_index, None);
        assert_eq!(project.selected_variant_index, None);
        assert!(!project.can_reset());
    }

    #[test]
    fn select_variant_rejects_out_of_range() -> anyhow::Result<()> {
        let mut project = project();
        assert!(matches!(
            project.select_variant(0),
            Err(AppError::InvalidIndex { index: 0, len: 0 })
        ));

        let multi = EditStep::with_variants(
            EditKind::Variation,
            "variations",
            vec![image(1), image(2), image(3)],
        )
        .ok_or_else(|| anyhow::anyhow!("variants should not be empty"))?;
        project.append_edit_step(multi, "Variations");

        project.select_variant(2)?;
        assert_eq!(project.active_image(), &image(3));
        assert!(matches!(
            project.select_variant(3),
            Err(AppError::InvalidIndex { index: 3, len: 3 })
        ));
        assert_eq!(project.selected_variant_index, Some(2));
        Ok(())
    }

    #[test]
    fn undo_resets_variant_selection() -> anyhow::Result<()> {
        let mut project = project();
        project.append_edit_step(step(1), "A");
        let multi = EditStep::with_variants(EditKind::Variation, "v", vec![image(2), image(3)])
            .ok_or_else(|| anyhow::anyhow!("variants should not be empty"))?;
        project.append_edit_step(multi, "V");
        project.select_variant(1)?;

        project.undo();
        project.redo();
        assert_eq!(project.selected_variant_index, Some(0));
        assert_eq!(project.active_image(), &image(2));
        Ok(())
    }

    #[test]
    fn jump_to_moves_within_bounds_only() -> anyhow::Result<()> {
        let mut project = project();
        project.append_edit_step(step(1), "A");
        project.append_edit_step(step(2), "B");
        project.append_edit_step(step(3), "C");

        project.jump_to(Some(0))?;
        assert_eq!(project.history_index, Some(0));
        assert_eq!(project.selected_variant_index, Some(0));
        assert_eq!(tags(&project), vec![1, 2, 3]);

        project.jump_to(None)?;
        assert_eq!(project.active_image(), &image(0));

        assert!(matches!(
            project.jump_to(Some(3)),
            Err(AppError::InvalidIndex { index: 3, len: 3 })
        ));
        assert_eq!(project.history_index, None);
        Ok(())
    }

    #[test]
    fn invariants_hold_across_mixed_operations() {
        let mut project = project();
        let mut seed: u32 = 0x2545_f491;

        for round in 0..2_000u32 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            match seed % 6 {
                0 | 1 => project.append_edit_step(step((round % 200) as u8), format!("{round}")),
                2 => {
                    project.undo();
                }
                3 => {
                    project.redo();
                }
                4 => {
                    let target = (seed as usize / 6) % (project.edit_steps.len() + 1);
                    let target = target.checked_sub(1);
                    let _ = project.jump_to(target);
                }
                _ => {
                    if seed % 97 == 0 {
                        project.reset_all();
                    } else {
                        let _ = project.select_variant(0);
                    }
                }
            }

            assert!(project.is_consistent(), "broken after round {round}");
            assert_eq!(project.can_undo(), project.history_index.is_some());
        }
    }

    #[test]
    fn inconsistent_pointers_are_detected() {
        let mut project = project();
        project.append_edit_step(step(1), "A");
        project.selected_variant_index = Some(4);
        assert!(!project.is_consistent());

        project.selected_variant_index = None;
        assert!(!project.is_consistent());

        project.selected_variant_index = Some(0);
        project.prompt_log.clear();
        assert!(!project.is_consistent());
    }
}
