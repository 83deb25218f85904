use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand, ValueEnum};

use crate::{
    error::{AppError, AppResult},
    gemini::ImageGateway,
    imaging::{image_dimensions, ExportQuality},
    mask::{MaskCanvas, MaskSurface, Stroke},
    models::{EditOptions, LightingOptions, ProjectSummary, StyleChoice},
    prompt::{self, Transform},
    session::Session,
    storage::ProjectStore,
};

const DEFAULT_INTENSITY: u8 = 80;
const DEFAULT_LIGHT_LEVEL: u8 = 50;

#[derive(Parser, Debug)]
#[command(author, version, about = "Prompt-driven photo editing with per-project undo history")]
pub struct Cli {
    /// Directory holding the saved projects
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List projects; the active one is starred
    List,
    /// Import an image file as a new project; it becomes active if none is
    Import { path: PathBuf },
    /// Make a project the active one
    Activate { project: String },
    /// Edit the active image with a prompt and optional structured options
    Edit(EditArgs),
    /// Upscale the active image
    Upscale(ProjectArg),
    /// Create a subtle variation of the active image
    Variation(ProjectArg),
    /// Mirror or rotate the active image
    Transform {
        #[arg(value_enum)]
        kind: TransformArg,
        #[command(flatten)]
        target: ProjectArg,
    },
    Undo(ProjectArg),
    Redo(ProjectArg),
    /// Drop every edit and return to the original image
    Reset(ProjectArg),
    /// Choose a variant of the current edit step
    Select {
        variant: usize,
        #[command(flatten)]
        target: ProjectArg,
    },
    /// Move to an edit step by number, or to `original`
    Jump {
        step: JumpTarget,
        #[command(flatten)]
        target: ProjectArg,
    },
    Delete { project: String },
    /// Remove all projects
    Clear,
    /// Write the active image to a file
    Export {
        output: PathBuf,
        #[arg(short, long, value_enum, default_value = "good")]
        quality: QualityArg,
        #[command(flatten)]
        target: ProjectArg,
    },
    /// Show the edit log of a project
    History(ProjectArg),
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ProjectArg {
    /// Project id; defaults to the active project
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct EditArgs {
    /// Free-text instruction
    #[arg(default_value = "")]
    pub prompt: String,
    #[arg(long)]
    pub quick_action: Option<String>,
    #[arg(long)]
    pub style: Option<String>,
    #[arg(long, requires = "style")]
    pub style_description: Option<String>,
    /// Style strength in percent
    #[arg(long, default_value_t = DEFAULT_INTENSITY)]
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub intensity: u8,
    #[arg(long)]
    pub angle: Option<String>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub brightness: Option<u8>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub temperature: Option<u8>,
    #[arg(long = "background")]
    pub backgrounds: Vec<String>,
    #[arg(long = "foreground")]
    pub foregrounds: Vec<String>,
    /// Crop and resize the result, e.g. 1920x1080
    #[arg(long)]
    pub output_size: Option<String>,
    /// Mask stroke as "x,y;x,y;..." in image pixels; repeatable
    #[arg(long = "stroke")]
    pub strokes: Vec<StrokeArg>,
    #[arg(long, default_value_t = 40.0)]
    pub brush_size: f32,
    /// PNG whose painted (non-transparent) pixels mark the area to edit
    #[arg(long, conflicts_with = "strokes")]
    pub mask_overlay: Option<PathBuf>,
    #[command(flatten)]
    pub target: ProjectArg,
}

impl EditArgs {
    fn is_masked(&self) -> bool {
        !self.strokes.is_empty() || self.mask_overlay.is_some()
    }

    fn to_options(&self) -> EditOptions {
        let lighting = (self.brightness.is_some() || self.temperature.is_some()).then(|| {
            LightingOptions {
                brightness: self.brightness.unwrap_or(DEFAULT_LIGHT_LEVEL),
                temperature: self.temperature.unwrap_or(DEFAULT_LIGHT_LEVEL),
            }
        });

        EditOptions {
            prompt: self.prompt.clone(),
            quick_action: self.quick_action.clone(),
            style: self.style.clone().map(|name| StyleChoice {
                name,
                description: self.style_description.clone(),
                intensity: self.intensity,
            }),
            camera_angle: self.angle.clone(),
            lighting,
            backgrounds: self.backgrounds.clone(),
            foregrounds: self.foregrounds.clone(),
            masked: self.is_masked(),
            output_size: self.output_size.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransformArg {
    MirrorHorizontal,
    MirrorVertical,
    RotateClockwise,
    RotateCounterClockwise,
}

impl From<TransformArg> for Transform {
    fn from(value: TransformArg) -> Self {
        match value {
            TransformArg::MirrorHorizontal => Self::MirrorHorizontal,
            TransformArg::MirrorVertical => Self::MirrorVertical,
            TransformArg::RotateClockwise => Self::RotateClockwise,
            TransformArg::RotateCounterClockwise => Self::RotateCounterClockwise,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QualityArg {
    /// JPEG 100
    High,
    /// JPEG 92
    Good,
    /// JPEG 75
    Medium,
    /// JPEG 50
    Low,
    /// Optimized PNG
    Lossless,
}

impl From<QualityArg> for ExportQuality {
    fn from(value: QualityArg) -> Self {
        match value {
            QualityArg::High => Self::High,
            QualityArg::Good => Self::Good,
            QualityArg::Medium => Self::Medium,
            QualityArg::Low => Self::Low,
            QualityArg::Lossless => Self::Lossless,
        }
    }
}

/// `original` or a zero-based edit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTarget(pub Option<usize>);

impl FromStr for JumpTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("original") {
            return Ok(Self(None));
        }
        value
            .parse::<usize>()
            .map(|step| Self(Some(step)))
            .map_err(|_| format!("expected a step number or `original`, got `{value}`"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeArg(pub Vec<(f32, f32)>);

impl FromStr for StrokeArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let points = value
            .split(';')
            .map(str::trim)
            .filter(|point| !point.is_empty())
            .map(|point| {
                let (x, y) = point
                    .split_once(',')
                    .ok_or_else(|| format!("invalid point `{point}`, expected x,y"))?;
                let x = x.trim().parse::<f32>().map_err(|error| error.to_string())?;
                let y = y.trim().parse::<f32>().map_err(|error| error.to_string())?;
                Ok((x, y))
            })
            .collect::<Result<Vec<_>, String>>()?;

        if points.is_empty() {
            return Err("a stroke needs at least one point".to_string());
        }
        Ok(Self(points))
    }
}

pub async fn execute<S, G>(session: &Session<S, G>, command: Command) -> AppResult<()>
where
    S: ProjectStore,
    G: ImageGateway,
{
    match command {
        Command::List => {
            let active = session.active_project_id().ok();
            for summary in session.summaries() {
                let marker = if active.as_deref() == Some(summary.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}", describe(&summary));
            }
        }
        Command::Import { path } => {
            let summary = session.import_path(&path)?;
            println!("imported {}", describe(&summary));
        }
        Command::Activate { project } => session.set_active(&project)?,
        Command::Edit(args) => {
            let project_id = resolve(session, &args.target)?;
            let intent = prompt::compose(&args.to_options())?;
            let summary = if args.is_masked() {
                let mut surface = mask_surface(session, &project_id, &args)?;
                session
                    .generate_masked(&project_id, intent, &mut surface)
                    .await?
            } else {
                session.generate(&project_id, intent).await?
            };
            println!("{}", describe(&summary));
        }
        Command::Upscale(target) => {
            let summary = session.upscale(&resolve(session, &target)?).await?;
            println!("{}", describe(&summary));
        }
        Command::Variation(target) => {
            let summary = session.variation(&resolve(session, &target)?).await?;
            println!("{}", describe(&summary));
        }
        Command::Transform { kind, target } => {
            let summary = session
                .transform(&resolve(session, &target)?, kind.into())
                .await?;
            println!("{}", describe(&summary));
        }
        Command::Undo(target) => {
            if !session.undo(&resolve(session, &target)?)? {
                println!("nothing to undo");
            }
        }
        Command::Redo(target) => {
            if !session.redo(&resolve(session, &target)?)? {
                println!("nothing to redo");
            }
        }
        Command::Reset(target) => session.reset(&resolve(session, &target)?)?,
        Command::Select { variant, target } => {
            session.select_variant(&resolve(session, &target)?, variant)?
        }
        Command::Jump { step, target } => session.jump_to(&resolve(session, &target)?, step.0)?,
        Command::Delete { project } => session.delete_project(&project)?,
        Command::Clear => session.clear_all()?,
        Command::Export {
            output,
            quality,
            target,
        } => {
            let path = session.export(&resolve(session, &target)?, quality.into(), &output)?;
            println!("wrote {}", path.display());
        }
        Command::History(target) => {
            let project = session.project(&resolve(session, &target)?)?;
            let current = project.history_index;
            let marker = |active: bool| if active { ">" } else { " " };
            println!("{} original: {}", marker(current.is_none()), project.name);
            for (index, label) in project.prompt_log.iter().enumerate() {
                let variants = project.edit_steps[index].variants.len();
                println!(
                    "{} {index}: {label} ({variants} variant(s))",
                    marker(current == Some(index))
                );
            }
            let yes_no = |available: bool| if available { "yes" } else { "no" };
            println!(
                "undo: {}, redo: {}, reset: {}",
                yes_no(project.can_undo()),
                yes_no(project.can_redo()),
                yes_no(project.can_reset())
            );
        }
    }

    if let Some(banner) = session.banner() {
        tracing::warn!("{banner}");
    }
    Ok(())
}

fn resolve<S: ProjectStore, G: ImageGateway>(
    session: &Session<S, G>,
    target: &ProjectArg,
) -> AppResult<String> {
    match &target.project {
        Some(project) => Ok(project.clone()),
        None => session.active_project_id(),
    }
}

fn mask_surface<S: ProjectStore, G: ImageGateway>(
    session: &Session<S, G>,
    project_id: &str,
    args: &EditArgs,
) -> AppResult<MaskSurface> {
    let project = session.project(project_id)?;
    let surface = match &args.mask_overlay {
        Some(path) => {
            let surface = MaskSurface::from_overlay(image::open(path)?.into_rgba8());
            let image_size = image_dimensions(&project.active_image().bytes)?;
            if surface.dimensions() != image_size {
                return Err(AppError::MaskSizeMismatch {
                    mask: surface.dimensions(),
                    image: image_size,
                });
            }
            surface
        }
        None => {
            let mut surface = MaskSurface::for_image(project.active_image())?;
            for stroke in &args.strokes {
                surface.draw(&Stroke {
                    points: stroke.0.clone(),
                    brush_size: args.brush_size,
                });
            }
            surface
        }
    };
    if surface.is_empty() {
        return Err(AppError::NoMask);
    }
    Ok(surface)
}

fn describe(summary: &ProjectSummary) -> String {
    let position = match summary.history_index {
        Some(index) => format!("step {} of {}", index + 1, summary.edit_count),
        None => format!("original ({} edits)", summary.edit_count),
    };
    format!(
        "{} {} [{}] {}",
        summary.id,
        summary.name,
        summary.created_at.format("%Y-%m-%d %H:%M"),
        position
    )
}
