use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::subscriber;
use tracing_subscriber::{EnvFilter, fmt};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. Repeated calls are no-ops so
/// embedders and tests can both call it freely.
pub fn init_tracing(verbose: bool) -> Result<()> {
    if TRACING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let default_directive = if verbose {
        "linkgate=debug"
    } else {
        "linkgate=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    subscriber::set_global_default(subscriber)?;
    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_noop() {
        init_tracing(false).unwrap();
        init_tracing(true).unwrap();
    }
}
