//! CLI config for series tags

use coordinator_ingest::series::TagOptions;

/// CLI config for series tags
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TagConfig {
    /// Maximum length, in bytes, of a label name or value. Writes carrying a
    /// longer label are rejected.
    #[clap(
        long = "max-tag-literal-length",
        env = "COORDINATOR_MAX_TAG_LITERAL_LENGTH",
        default_value = "255",
        action
    )]
    pub max_tag_literal_length: usize,

    /// Store the Prometheus metric type of every series alongside it.
    #[clap(
        long = "store-metrics-type",
        env = "COORDINATOR_STORE_METRICS_TYPE",
        default_value = "false",
        action
    )]
    pub store_metrics_type: bool,
}

impl TagConfig {
    pub fn tag_options(&self) -> TagOptions {
        TagOptions::default().with_max_tag_literal_length(self.max_tag_literal_length)
    }
}
