use crate::cli::actions::{authenticator, client, signature, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Authenticator(args) => authenticator::execute(args).await,
        Action::Client(args) => client::execute(args).await,
        Action::Signature(args) => signature::execute(&args),
    }
}
