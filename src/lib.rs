pub mod classifier;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod session;
pub mod settings;
#[cfg(feature = "torch")]
pub mod torch;

pub use classifier::{Classification, Classifier, ModelLoader, Prediction};
pub use error::{ClassifyError, ErrorKind};
pub use input::Image;
pub use pipeline::{ClassificationPipeline, Outcome};
pub use session::{Session, Ticket, View};
pub use settings::Settings;

/// imgclass defaults, overridable through `Settings`
pub mod config {
    /// Default log filter
    pub const RUST_LOG: &str = "info";

    /// The bundled TorchScript classifier
    pub const MODEL_FILE: &str = "models/mobilenet_v2.pt";

    /// Pick `TOP_N` largest softmax probabilities in a classifier model
    pub const TOP_N: usize = 5;

    /// Input size of MobileNetV2
    pub const INPUT_WIDTH: u32 = 224;
    pub const INPUT_HEIGHT: u32 = 224;

    /// Largest accepted input side
    pub const MAX_INPUT_SIDE: u32 = 4096;

    /// Prefix of environment overrides, e.g. `IMGCLASS_TOP_N=3`
    pub const ENV_PREFIX: &str = "IMGCLASS";

    /// Settings file read by the binary
    pub const SETTINGS_FILE: &str = "imgclass.toml";
}

pub mod util {
    use tracing_subscriber::EnvFilter;

    /// Install the global tracing subscriber. `RUST_LOG` wins over `level`
    pub fn init_tracing(level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
