//! End-to-end tests for the dispatch pipeline: trigger evaluation
//! through rendering, gating, rerouting, and the transport.

#![allow(clippy::unwrap_used)]

mod support;

use std::sync::Arc;

use buildmail_dispatch::{
    Build, BuildResult, BufferListener, DispatchConfig, DispatchStatus, EmailSpec, MailDispatcher,
    Phase, Publisher, RetryPolicy, ScriptEngine, TransportError,
    trigger::{AlwaysTrigger, FailureTrigger, SuccessTrigger},
};
use pretty_assertions::assert_eq;
use support::{CancelEngine, FakeTransport, NoScriptEngine, RewriteEngine, renderer};

fn failed_build() -> Arc<Build> {
    Arc::new(Build {
        project: "backend".to_string(),
        number: 17,
        id: "17".to_string(),
        result: Some(BuildResult::Failure),
        url: "https://ci.example.com/backend/17/".to_string(),
        ..Build::default()
    })
}

fn failure_publisher(recipient_list: &str) -> Publisher {
    Publisher {
        recipient_list: String::new(),
        default_subject: "$PROJECT_NAME - Build # $BUILD_NUMBER - $BUILD_STATUS!".to_string(),
        default_body: "See $BUILD_URL".to_string(),
        triggers: vec![Arc::new(FailureTrigger::new(EmailSpec {
            recipient_list: recipient_list.to_string(),
            ..EmailSpec::default()
        }))],
        ..Publisher::default()
    }
}

fn dispatcher(
    config: DispatchConfig,
    transport: Arc<FakeTransport>,
    engine: Arc<dyn ScriptEngine>,
) -> MailDispatcher {
    MailDispatcher::new(Arc::new(config), renderer(), transport, engine).with_retry_policy(
        RetryPolicy {
            max_attempts: 2,
            backoff_secs: 0,
        },
    )
}

#[tokio::test]
async fn test_failed_build_notifies_configured_recipients() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        admin_address: "builds@example.com".to_string(),
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(NoScriptEngine));

    let build = failed_build();
    let publisher = failure_publisher("dev@example.com, cc:lead@example.com");
    let outcomes = dispatcher
        .perform(&publisher, build.clone(), Phase::PostBuild, listener.clone())
        .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    assert_eq!(outcomes[0].trigger, "Failure");

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    let message = &deliveries[0];
    assert_eq!(message.from.to_string(), "builds@example.com");
    assert_eq!(message.to.to_string(), "dev@example.com");
    assert_eq!(message.cc.to_string(), "lead@example.com");
    assert_eq!(message.subject, "backend - Build # 17 - FAILURE!");
    assert_eq!(message.content_type, "text/plain; charset=UTF-8");
    assert_eq!(message.header("X-Buildmail-Job"), Some("backend"));
    assert_eq!(message.header("X-Buildmail-Result"), Some("FAILURE"));

    // First successful send becomes the build's correlation record.
    assert_eq!(build.message_id(), Some(message.message_id.as_str()));

    assert!(listener.contains("Email was triggered for: Failure"));
    assert!(listener.contains("Sending email for trigger: Failure"));
    assert!(listener.contains("Sending email to: dev@example.com lead@example.com"));
}

#[tokio::test]
async fn test_default_trigger_falls_back_to_the_project_recipient_list() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let publisher = Publisher {
        recipient_list: "team@example.com".to_string(),
        triggers: vec![Arc::new(FailureTrigger::default())],
        ..Publisher::default()
    };

    let outcomes = dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener)
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    assert_eq!(transport.deliveries()[0].to.to_string(), "team@example.com");
}

#[tokio::test]
async fn test_replaced_trigger_sends_nothing() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let publisher = Publisher {
        triggers: vec![
            Arc::new(AlwaysTrigger::new(EmailSpec {
                recipient_list: "everyone@example.com".to_string(),
                ..EmailSpec::default()
            })),
            Arc::new(
                FailureTrigger::new(EmailSpec {
                    recipient_list: "dev@example.com".to_string(),
                    ..EmailSpec::default()
                })
                .replacing(vec!["Always".to_string()]),
            ),
        ],
        ..Publisher::default()
    };

    let outcomes = dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener.clone())
        .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].trigger, "Failure");
    assert_eq!(transport.deliveries().len(), 1);
    assert_eq!(transport.deliveries()[0].to.to_string(), "dev@example.com");
    assert!(listener.contains(
        "Trigger Always was overridden by another trigger and will not send an email."
    ));
}

#[tokio::test]
async fn test_duplicate_recipients_collapse_before_sending() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let outcomes = dispatcher
        .perform(
            &failure_publisher("a@x.com, a@x.com, b@x.com"),
            failed_build(),
            Phase::PostBuild,
            listener,
        )
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    let message = &transport.deliveries()[0];
    assert_eq!(message.to.to_string(), "a@x.com, b@x.com");
    assert_eq!(message.all_recipients().len(), 2);
}

#[tokio::test]
async fn test_no_trigger_fires_for_a_green_build() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let build = Arc::new(Build {
        result: Some(BuildResult::Success),
        ..Build::default()
    });
    let publisher = failure_publisher("dev@example.com");

    let outcomes = dispatcher
        .perform(&publisher, build, Phase::PostBuild, listener.clone())
        .await;

    assert!(outcomes.is_empty());
    assert!(transport.deliveries().is_empty());
    assert!(listener.contains("No emails were triggered."));
}

#[tokio::test]
async fn test_socket_error_retries_once_and_succeeds() {
    let transport = FakeTransport::scripted(vec![
        Err(TransportError::Transient("connection refused".to_string())),
        Ok(()),
    ]);
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let outcomes = dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            failed_build(),
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    assert_eq!(transport.deliveries().len(), 2);
    assert!(listener.contains("Socket error sending email, retrying once more in 10 seconds..."));
}

#[tokio::test]
async fn test_socket_error_twice_gives_up() {
    let transport = FakeTransport::scripted(vec![
        Err(TransportError::Transient("connection refused".to_string())),
        Err(TransportError::Transient("connection refused".to_string())),
    ]);
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let build = failed_build();
    let outcomes = dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            build.clone(),
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Failed);
    assert_eq!(transport.deliveries().len(), 2);
    assert!(listener.contains("Failed after second try sending email"));
    assert!(build.message_id().is_none());
}

#[tokio::test]
async fn test_partial_failure_classifies_addresses() {
    let sent = buildmail_dispatch::Address::parse("ok@example.com").unwrap();
    let valid_unsent = buildmail_dispatch::Address::parse("missed@example.com").unwrap();
    let invalid = buildmail_dispatch::Address::parse("gone@old.example.com").unwrap();
    let transport = FakeTransport::scripted(vec![Err(TransportError::Partial {
        message: "550 user unknown".to_string(),
        sent: vec![sent.clone()],
        valid_unsent: vec![valid_unsent.clone()],
        invalid: vec![invalid.clone()],
    })]);
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let build = failed_build();
    let outcomes = dispatcher
        .perform(
            &failure_publisher("ok@example.com, missed@example.com, gone@old.example.com"),
            build.clone(),
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    // Something was delivered, so the send counts and is recorded.
    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    assert_eq!(outcomes[0].sent, vec![sent]);
    assert_eq!(outcomes[0].valid_unsent, vec![valid_unsent]);
    assert_eq!(outcomes[0].invalid, vec![invalid]);
    assert!(build.message_id().is_some());

    assert!(listener.contains("Successfully sent to the following addresses: ok@example.com"));
    assert!(
        listener.contains("Error sending to the following VALID addresses: missed@example.com")
    );
    assert!(
        listener
            .contains("Error sending to the following INVALID addresses: gone@old.example.com")
    );
}

#[tokio::test]
async fn test_gate_script_cancels_the_send() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(CancelEngine),
    );

    let mut publisher = failure_publisher("dev@example.com");
    publisher.presend_script = "cancel = true".to_string();

    let outcomes = dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener.clone())
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Cancelled);
    assert!(transport.deliveries().is_empty());
    assert!(listener.contains("Email sending was cancelled by user script."));
}

#[tokio::test]
async fn test_gate_script_edits_reach_the_transport() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(RewriteEngine),
    );

    let mut publisher = failure_publisher("dev@example.com");
    publisher.presend_script = "msg.subject = ...".to_string();

    let outcomes = dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener.clone())
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    let message = &transport.deliveries()[0];
    assert!(message.subject.starts_with("[gated] "));
    assert_eq!(
        message.to.to_string(),
        "dev@example.com, added-by-script@example.com"
    );
}

#[tokio::test]
async fn test_emergency_reroute_wins_over_gate_edits() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        emergency_reroute: "oncall@example.com".to_string(),
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(RewriteEngine));

    let mut publisher = failure_publisher("dev@example.com, cc:lead@example.com");
    publisher.presend_script = "msg.to += ...".to_string();

    let outcomes = dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener.clone())
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Sent);
    let message = &transport.deliveries()[0];
    assert_eq!(message.to.to_string(), "oncall@example.com");
    assert!(message.cc.is_empty());
    assert!(message.bcc.is_empty());
}

#[tokio::test]
async fn test_empty_recipient_list_skips_the_send() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let outcomes = dispatcher
        .perform(
            &failure_publisher(""),
            failed_build(),
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Skipped);
    assert!(transport.deliveries().is_empty());
    assert!(listener.contains("An attempt to send an e-mail to empty list of recipients, ignored."));
}

#[tokio::test]
async fn test_repeated_failure_threads_onto_the_previous_notification() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        debug_mode: true,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(NoScriptEngine));

    let previous = Arc::new(Build {
        result: Some(BuildResult::Failure),
        ..Build::default()
    });
    assert!(previous.record_message_id("<previous@buildmail>".to_string()));
    let build = Arc::new(Build {
        result: Some(BuildResult::Failure),
        previous: Some(previous),
        ..Build::default()
    });

    dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            build,
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    let message = &transport.deliveries()[0];
    assert_eq!(message.header("In-Reply-To"), Some("<previous@buildmail>"));
    assert_eq!(message.header("References"), Some("<previous@buildmail>"));
    assert!(listener.contains("Setting In-Reply-To since last build was not successful"));
}

#[tokio::test]
async fn test_no_threading_after_a_green_build() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let previous = Arc::new(Build {
        result: Some(BuildResult::Success),
        ..Build::default()
    });
    assert!(previous.record_message_id("<previous@buildmail>".to_string()));
    let build = Arc::new(Build {
        result: Some(BuildResult::Failure),
        previous: Some(previous),
        ..Build::default()
    });

    dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            build,
            Phase::PostBuild,
            listener,
        )
        .await;

    assert_eq!(transport.deliveries()[0].header("In-Reply-To"), None);
}

#[tokio::test]
async fn test_invalid_admin_address_fails_only_that_message() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        admin_address: "not an address".to_string(),
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(NoScriptEngine));

    let outcomes = dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            failed_build(),
            Phase::PostBuild,
            listener.clone(),
        )
        .await;

    assert_eq!(outcomes[0].status, DispatchStatus::Failed);
    assert!(transport.deliveries().is_empty());
    assert!(listener.contains("Could not send email as a part of the post-build publishers."));
}

#[tokio::test]
async fn test_list_and_precedence_headers() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        list_id: Some("<builds.example.com>".to_string()),
        precedence_bulk: true,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(NoScriptEngine));

    dispatcher
        .perform(
            &failure_publisher("dev@example.com"),
            failed_build(),
            Phase::PostBuild,
            listener,
        )
        .await;

    let message = &transport.deliveries()[0];
    assert_eq!(message.header("List-ID"), Some("<builds.example.com>"));
    assert_eq!(message.header("Precedence"), Some("bulk"));
}

#[tokio::test]
async fn test_attachments_and_build_log_ride_along() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let config = DispatchConfig {
        debug_mode: true,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(config, transport.clone(), Arc::new(NoScriptEngine))
        .with_attachment_collector(Arc::new(support::FakeCollector));

    let mut publisher = failure_publisher("dev@example.com");
    publisher.attachments_pattern = "target/reports/*.xml".to_string();
    publisher.attach_build_log = true;
    publisher.compress_build_log = true;

    dispatcher
        .perform(&publisher, failed_build(), Phase::PostBuild, listener.clone())
        .await;

    let message = &transport.deliveries()[0];
    assert_eq!(message.attachments.len(), 2);
    assert_eq!(message.attachments[0].filename, "target/reports/*.xml");
    assert_eq!(message.attachments[1].filename, "build-17.log.gz");
    assert!(listener.contains("Request made to attach build log"));
}

#[tokio::test]
async fn test_pre_build_phase_only_runs_pre_build_triggers() {
    let transport = FakeTransport::succeeding();
    let listener = Arc::new(BufferListener::new());
    let dispatcher = dispatcher(
        DispatchConfig::default(),
        transport.clone(),
        Arc::new(NoScriptEngine),
    );

    let publisher = Publisher {
        triggers: vec![
            Arc::new(buildmail_dispatch::trigger::PreBuildTrigger::new(EmailSpec {
                recipient_list: "watchers@example.com".to_string(),
                ..EmailSpec::default()
            })),
            Arc::new(SuccessTrigger::new(EmailSpec {
                recipient_list: "dev@example.com".to_string(),
                ..EmailSpec::default()
            })),
        ],
        ..Publisher::default()
    };
    let build = Arc::new(Build {
        in_progress: true,
        ..Build::default()
    });

    let outcomes = dispatcher
        .perform(&publisher, build, Phase::PreBuild, listener)
        .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].trigger, "Before Build");
    assert_eq!(
        transport.deliveries()[0].to.to_string(),
        "watchers@example.com"
    );
}
