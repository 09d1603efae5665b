use crossterm::style::{self, Stylize};

use crate::progress::Spinner;
use crate::runtime::{ContainerRuntime, ImageDetails, RuntimeError};

/// How an image came to be available locally.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
    /// Already in local storage.
    Local(ImageDetails),
    /// Pulled from its registry during this run.
    Pulled,
}

impl Availability {
    /// Uncompressed size, when the runtime reported one.
    pub fn size_hint(&self) -> Option<u64> {
        match self {
            Availability::Local(details) if details.size > 0 => Some(details.size),
            _ => None,
        }
    }
}

/// Make sure `reference` is in local storage, pulling it only when the runtime
/// reports it missing. Any other runtime failure is returned as-is.
pub fn ensure_present(
    runtime: &dyn ContainerRuntime,
    reference: &str,
    spinner: &Spinner,
) -> Result<Availability, RuntimeError> {
    match runtime.inspect(reference) {
        Ok(details) if !details.id.is_empty() => {
            log::debug!("{reference} is {} {:?}", details.id, details.repo_tags);
            spinner.println(format!(
                "  image {} already exists",
                style::style(reference).cyan()
            ));
            Ok(Availability::Local(details))
        }
        Ok(_) | Err(RuntimeError::ImageNotFound(_)) => {
            spinner.println(format!("  {} {} ...", "pulling".dim(), style::style(reference).cyan()));
            spinner.set_message(format!("Pulling {reference} ..."));
            runtime.pull(reference)?;
            Ok(Availability::Pulled)
        }
        Err(e) => Err(e),
    }
}
