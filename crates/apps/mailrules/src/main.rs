//! mailrules - apply per-label rules to a Gmail mailbox
//!
//! Configuration comes from the environment (optionally a `.env` file):
//! `CREDENTIALS_JSON` and `CONFIG_FILE` are required, `USER_ID` and
//! `CLIENT_TOKEN_FILE` are optional.

use anyhow::{Context, Result};
use log::{error, info};
use std::process::ExitCode;

use mail::{
    GmailAuth, GmailClient, GmailCredentials, LopdfDecryptor, LopdfRenderer, RuleEngine, RuleSet,
    Settings, SystemBrowser, TokenCache,
};

fn main() -> ExitCode {
    // A missing .env file is fine; the variables may come from the shell
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let settings = Settings::from_env()?;

    let rules = RuleSet::load(&settings.rules_path)?;
    rules.validate()?;
    info!(
        "Loaded {} label(s) with {} action(s) from {}",
        rules.label_actions.len(),
        rules.action_count(),
        settings.rules_path.display()
    );

    let credentials = GmailCredentials::from_file(&settings.credentials_path)?;
    let auth = GmailAuth::new(credentials, TokenCache::new(&settings.token_path));
    let credential = auth
        .authorize(&SystemBrowser)
        .context("Unable to retrieve Gmail client")?;
    let client = GmailClient::new(auth, credential, &settings.user_id);

    let renderer = LopdfRenderer;
    let decryptor = LopdfDecryptor;
    let stats = RuleEngine::new(&client, &renderer, &decryptor).run(&rules)?;

    info!("Run complete: {}", stats);
    Ok(())
}
