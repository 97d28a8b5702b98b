//! Notification delivery.
//!
//! Lets an operator (or a thin webhook shim) feed one push notification to the
//! engine, either as raw `X-Goog-*` headers or as individual flags.

use crmsync_engine::{Notification, NotificationOutcome};

use super::App;
use crate::cli::NotifyArgs;
use crate::error::{CliError, CliResult};

/// Builds the notification described by `args`.
pub fn notification(args: &NotifyArgs) -> CliResult<Notification> {
    if !args.headers.is_empty() {
        let headers = args
            .headers
            .iter()
            .map(|raw| split_header(raw))
            .collect::<CliResult<Vec<_>>>()?;
        return Ok(Notification::from_headers(headers)?);
    }

    let (Some(channel_id), Some(resource_id)) = (&args.channel_id, &args.resource_id) else {
        return Err(CliError::Notification(
            "--channel-id and --resource-id are required without --header".to_string(),
        ));
    };
    let mut notification = Notification::parse(channel_id, &args.resource_state, resource_id)?;
    notification.message_number = args.message_number;
    if let Some(token) = &args.token {
        notification = notification.with_token(token);
    }
    Ok(notification)
}

fn split_header(raw: &str) -> CliResult<(&str, &str)> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .ok_or_else(|| CliError::Notification(format!("header {:?} is not `Name: value`", raw)))
}

pub async fn run(app: &App, args: &NotifyArgs) -> CliResult<()> {
    let notification = notification(args)?;
    match app.engine.handle_notification(&notification).await? {
        NotificationOutcome::Discarded(reason) => println!("discarded ({})", reason),
        NotificationOutcome::Acknowledged => println!("acknowledged"),
        NotificationOutcome::Applied(report) => println!("{}", super::sync::summary(&report)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_engine::ResourceState;

    fn args() -> NotifyArgs {
        NotifyArgs {
            headers: Vec::new(),
            channel_id: None,
            resource_id: None,
            resource_state: "exists".to_string(),
            message_number: None,
            token: None,
        }
    }

    #[test]
    fn from_flags() {
        let mut args = args();
        args.channel_id = Some("chan-1".to_string());
        args.resource_id = Some("res-1".to_string());
        args.message_number = Some(7);
        args.token = Some("s3cret".to_string());

        let n = notification(&args).unwrap();
        assert_eq!(n.channel_id, "chan-1");
        assert_eq!(n.resource_state, ResourceState::Exists);
        assert_eq!(n.message_number, Some(7));
        assert_eq!(n.channel_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn from_headers() {
        let mut args = args();
        args.headers = vec![
            "X-Goog-Channel-ID: chan-1".to_string(),
            "x-goog-resource-id:res-1".to_string(),
            "X-Goog-Resource-State: sync".to_string(),
            "X-Goog-Message-Number: 1".to_string(),
        ];
        let n = notification(&args).unwrap();
        assert_eq!(n.resource_id, "res-1");
        assert_eq!(n.resource_state, ResourceState::Sync);
        assert_eq!(n.message_number, Some(1));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut args = args();
        args.headers = vec!["X-Goog-Channel-ID chan-1".to_string()];
        assert!(matches!(
            notification(&args),
            Err(CliError::Notification(_))
        ));
    }

    #[test]
    fn unknown_state_is_rejected() {
        let mut args = args();
        args.channel_id = Some("chan-1".to_string());
        args.resource_id = Some("res-1".to_string());
        args.resource_state = "deleted".to_string();
        assert!(matches!(notification(&args), Err(CliError::Sync(_))));
    }
}
