use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Plain,
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn setup(format: Format) {
    match format {
        Format::Plain => tracing_subscriber::fmt().with_env_filter(filter()).init(),
        Format::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .init(),
    }
}

/// Text carried by a panic payload, for hooks and panic-catching layers.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("Unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("disk full")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "disk full");

        let payload = std::panic::catch_unwind(|| panic!("{} left", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "3 left");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
