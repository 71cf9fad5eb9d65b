//! Mail dispatcher (component E collaborator).
//!
//! Hands the rendered alert file to an external mail-submission process on
//! standard input, with a 10-second deadline and no retry.

use std::{process::Stdio, time::Duration};

use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::{instrument, warn};

use crate::errors::TedError;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoke `sendmail_path` with `detection_list` as its argument, piping
/// `alert_body` to its standard input.
#[instrument(level = "debug", skip(alert_body))]
pub async fn dispatch(
    sendmail_path: &str,
    detection_list: &str,
    alert_body: &str,
) -> Result<(), TedError> {
    let mut child = Command::new(sendmail_path)
        .arg(detection_list)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| TedError::DispatchError(err.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(alert_body.as_bytes()).await {
            warn!("could not write alert to mail dispatcher stdin: {}", err);
        }
    }

    match timeout(DISPATCH_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(TedError::DispatchError(format!(
            "mail dispatcher exited with {}",
            status
        ))),
        Ok(Err(err)) => Err(TedError::DispatchError(err.to_string())),
        Err(_) => Err(TedError::DispatchError(
            "mail dispatcher timed out after 10s".to_owned(),
        )),
    }
}
