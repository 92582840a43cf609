//! Image resolution and building

use crate::catalog::PlatformFamily;
use crate::engine::{BuildContext, Engine, ImageRef};
use crate::error::{Error, Result};
use crate::host::HostRecord;
use crate::recipe::BuildRecipe;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How a host's image came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStrategy {
    /// Pulled and used untouched
    AsIs,
    /// Built from a user Dockerfile
    Dockerfile,
    /// Minimal build relying on the image entry point
    EntryPoint,
    /// Built from the bootstrap catalog
    Synthesized,
}

impl ImageStrategy {
    /// Whether sshd still has to be installed in the running container
    pub fn needs_ssh_install(self) -> bool {
        matches!(self, ImageStrategy::Dockerfile | ImageStrategy::EntryPoint)
    }
}

/// The engine work needed to produce a host's image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePlan {
    /// Pull a reference as-is
    Pull {
        /// Image reference
        reference: String,
    },
    /// Build from a user-supplied context directory
    Directory {
        /// Context root
        context: PathBuf,
        /// Dockerfile path relative to the context
        dockerfile: String,
        /// Build arguments
        build_args: BTreeMap<String, String>,
    },
    /// Build from a generated recipe
    Recipe {
        /// Entry point or catalog recipe
        strategy: ImageStrategy,
        /// Layers to build
        recipe: BuildRecipe,
        /// Build arguments
        build_args: BTreeMap<String, String>,
    },
}

impl ImagePlan {
    /// Strategy this plan implements
    pub fn strategy(&self) -> ImageStrategy {
        match self {
            ImagePlan::Pull { .. } => ImageStrategy::AsIs,
            ImagePlan::Directory { .. } => ImageStrategy::Dockerfile,
            ImagePlan::Recipe { strategy, .. } => *strategy,
        }
    }
}

/// An image ready to run, and how it was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// The image
    pub image: ImageRef,
    /// How it was produced
    pub strategy: ImageStrategy,
}

/// Produces images for hosts
pub struct ImageResolver<'a> {
    engine: &'a dyn Engine,
    env_build_args: Option<&'a str>,
    working_dir: &'a Path,
}

impl<'a> ImageResolver<'a> {
    /// Create a resolver
    pub fn new(engine: &'a dyn Engine, env_build_args: Option<&'a str>, working_dir: &'a Path) -> Self {
        Self {
            engine,
            env_build_args,
            working_dir,
        }
    }

    /// Decide what to pull or build, without talking to the engine
    pub fn plan(&self, host: &HostRecord) -> Result<ImagePlan> {
        plan(host, self.env_build_args, self.working_dir)
    }

    /// Pull or build the host's image
    pub async fn resolve(&self, host: &HostRecord) -> Result<ResolvedImage> {
        let plan = self.plan(host)?;
        let strategy = plan.strategy();
        debug!("Creating image for {} ({:?})", host.name, strategy);

        let image = match plan {
            ImagePlan::Pull { reference } => {
                info!("Pulling {} for {}", reference, host.name);
                self.engine.pull_image(&reference).await?
            }
            ImagePlan::Directory {
                context,
                dockerfile,
                build_args,
            } => {
                info!("Building {} from {}", host.name, context.join(&dockerfile).display());
                let context = BuildContext::Directory {
                    root: context,
                    dockerfile,
                };
                self.engine.build_image(&context, &build_args).await?
            }
            ImagePlan::Recipe {
                recipe, build_args, ..
            } => {
                let dockerfile = recipe.render();
                debug!("Dockerfile is {}", dockerfile);
                self.engine
                    .build_image(&BuildContext::Recipe(dockerfile), &build_args)
                    .await?
            }
        };

        info!("Image for {} is {}", host.name, image.id);
        Ok(ResolvedImage { image, strategy })
    }
}

/// Choose the image strategy for a host, in priority order
pub fn plan(host: &HostRecord, env_build_args: Option<&str>, working_dir: &Path) -> Result<ImagePlan> {
    if host.use_image_as_is {
        return Ok(ImagePlan::Pull {
            reference: base_image(host)?.to_string(),
        });
    }

    let build_args = merge_build_args(env_build_args, &host.docker_buildargs);

    if let Some(dockerfile) = &host.dockerfile {
        let (context, dockerfile) = dockerfile_context(dockerfile, working_dir);
        if !context.join(&dockerfile).is_file() {
            return Err(Error::image_build(
                &host.name,
                format!("unable to find dockerfile at {}", context.join(&dockerfile).display()),
            ));
        }
        return Ok(ImagePlan::Directory {
            context,
            dockerfile,
            build_args,
        });
    }

    if host.use_image_entry_point {
        return Ok(ImagePlan::Recipe {
            strategy: ImageStrategy::EntryPoint,
            recipe: BuildRecipe::entry_point_only(base_image(host)?, host.docker_cmd.as_ref()),
            build_args,
        });
    }

    let family = PlatformFamily::for_platform(host.platform_str())
        .ok_or_else(|| Error::unsupported_platform(host.platform_str()))?;
    Ok(ImagePlan::Recipe {
        strategy: ImageStrategy::Synthesized,
        recipe: BuildRecipe::ssh_image(base_image(host)?, family, host),
        build_args,
    })
}

fn base_image(host: &HostRecord) -> Result<&str> {
    host.image
        .as_deref()
        .filter(|image| !image.is_empty())
        .ok_or_else(|| Error::Misconfiguration(format!("host '{}' has no image", host.name)))
}

/// Relative Dockerfiles build with the working dir as context; absolute ones
/// use their parent directory
fn dockerfile_context(dockerfile: &str, working_dir: &Path) -> (PathBuf, String) {
    let path = Path::new(dockerfile);
    if path.is_absolute() {
        let context = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Dockerfile".to_string());
        (context, file)
    } else {
        (working_dir.to_path_buf(), dockerfile.to_string())
    }
}

/// Merge environment build args with the host's map
///
/// The environment value is a whitespace-delimited `KEY=VALUE` list. When it
/// yields at least one pair it replaces the host map entirely.
pub fn merge_build_args(
    env_value: Option<&str>,
    host_args: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut from_env = BTreeMap::new();
    for pair in env_value.unwrap_or("").split_whitespace() {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                from_env.insert(key.to_string(), value.to_string());
            }
            _ => warn!(
                "DOCKER_BUILDARGS entry '{}' is not KEY=VALUE, skipping",
                pair
            ),
        }
    }

    let merged = if from_env.is_empty() {
        host_args.clone()
    } else {
        from_env
    };
    debug!("Docker build buildargs: {:?}", merged);
    merged
}
