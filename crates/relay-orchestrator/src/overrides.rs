use std::path::Path;

use relay_queue::OverridesFile;

/// The four per-(user, context) override files under `dataDir/`, loaded once
/// at startup (SPEC_FULL §6.1). Each maps `"userId:contextId"` to a single
/// scalar, consulted when a task is built so a manual override always wins
/// over the configured default for that conversation.
pub struct Overrides {
    pub engine: OverridesFile<String>,
    pub model: OverridesFile<String>,
    pub mecho_mode: OverridesFile<String>,
    pub verbose: OverridesFile<bool>,
}

impl Overrides {
    pub async fn load(data_dir: &Path) -> Self {
        Self {
            engine: OverridesFile::load(data_dir.join("engine-overrides.json")).await,
            model: OverridesFile::load(data_dir.join("model-overrides.json")).await,
            mecho_mode: OverridesFile::load(data_dir.join("mecho-mode-overrides.json")).await,
            verbose: OverridesFile::load(data_dir.join("verbose-overrides.json")).await,
        }
    }

    pub fn key(user_id: &str, context_id: &str) -> String {
        format!("{user_id}:{context_id}")
    }
}
