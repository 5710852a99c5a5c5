//! Adapter event handlers
//!
//! Each handler is a short synchronous mutation of [`SessionCore`], run by
//! the reader task in the order events arrive.

use super::output::OutputCategory;
use super::SessionCore;
use crate::dap::events::{EventDispatcher, Flow};
use crate::dap::Event;

/// Subscribe the session's handlers to a dispatcher
pub fn install(dispatcher: &mut EventDispatcher<SessionCore>) {
    dispatcher.subscribe("initialized", |core, _| {
        core.session.set_adapter_ready();
        tracing::debug!("Adapter ready for configuration");
        Flow::Continue
    });

    dispatcher.subscribe("stopped", |core, event| {
        match event {
            Event::Stopped(body) => {
                core.session.on_stopped(body);
            }
            other => tracing::warn!(?other, "Malformed stopped event"),
        }
        Flow::Continue
    });

    dispatcher.subscribe("continued", |core, _| {
        core.session.on_continued();
        Flow::Continue
    });

    dispatcher.subscribe("process", |core, _| {
        core.session.on_process_started();
        Flow::Continue
    });

    dispatcher.subscribe("breakpoint", |core, event| {
        if let Event::Breakpoint(body) = event {
            core.breakpoints.apply_event(&body.reason, &body.breakpoint);
        }
        Flow::Continue
    });

    dispatcher.subscribe("output", |core, event| {
        if let Event::Output(body) = event {
            let category = OutputCategory::parse(body.category.as_deref());
            core.output.push(category, &body.output);
        }
        Flow::Continue
    });

    dispatcher.subscribe("exited", |core, event| {
        let exit_code = match event {
            Event::Exited { exit_code } => *exit_code,
            _ => None,
        };
        core.session.set_exit_code(exit_code);
        let reason = match exit_code {
            Some(code) => format!("program exited with code {}", code),
            None => "program exited".to_string(),
        };
        core.terminate(&reason);
        Flow::UnsubscribeAll
    });

    dispatcher.subscribe("terminated", |core, _| {
        core.terminate("debug adapter ended the session");
        Flow::UnsubscribeAll
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::OutputConfig;
    use crate::common::Error;
    use crate::dap::{EventMessage, OutputEventBody, StoppedEventBody};
    use crate::session::SessionState;
    use serde_json::json;

    fn setup() -> (EventDispatcher<SessionCore>, SessionCore) {
        let mut dispatcher = EventDispatcher::new();
        install(&mut dispatcher);
        let mut core = SessionCore::new(&OutputConfig::default());
        core.session
            .mark_initialized(Default::default())
            .unwrap();
        (dispatcher, core)
    }

    fn parse(event: &str, body: serde_json::Value) -> Event {
        Event::from_message(&EventMessage {
            seq: 1,
            event: event.to_string(),
            body: Some(body),
        })
    }

    #[test]
    fn test_stop_and_continue() {
        let (mut d, mut core) = setup();
        d.dispatch(&mut core, &Event::Initialized);
        core.session.mark_launched().unwrap();

        d.dispatch(&mut core, &parse("process", json!({"name": "demo.py"})));
        assert_eq!(core.session.state(), SessionState::Running);

        d.dispatch(
            &mut core,
            &Event::Stopped(StoppedEventBody {
                reason: "breakpoint".into(),
                description: None,
                thread_id: Some(1),
                all_threads_stopped: true,
                hit_breakpoint_ids: vec![],
                text: None,
            }),
        );
        assert_eq!(core.session.state(), SessionState::Paused);
        assert_eq!(core.session.current_thread_id(), Some(1));

        d.dispatch(&mut core, &parse("continued", json!({"threadId": 1})));
        assert_eq!(core.session.state(), SessionState::Running);
    }

    #[test]
    fn test_output_is_logged() {
        let (mut d, mut core) = setup();
        d.dispatch(
            &mut core,
            &Event::Output(OutputEventBody {
                category: Some("stdout".into()),
                output: "5\n".into(),
            }),
        );
        let records = core.output.records(None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, OutputCategory::Stdout);
    }

    #[tokio::test]
    async fn test_terminated_fails_pending_and_unsubscribes() {
        let (mut d, mut core) = setup();
        let waiters: Vec<_> = (0..3).map(|_| core.pending.register("evaluate").1).collect();

        d.dispatch(&mut core, &Event::Terminated);
        assert_eq!(core.session.state(), SessionState::Terminated);
        assert!(core.pending.is_empty());
        assert!(d.is_empty());

        for rx in waiters {
            assert!(matches!(rx.await.unwrap(), Err(Error::SessionTerminated(_))));
        }
    }

    #[test]
    fn test_exited_records_exit_code() {
        let (mut d, mut core) = setup();
        d.dispatch(&mut core, &parse("exited", json!({"exitCode": 2})));
        assert_eq!(core.session.exit_code(), Some(2));
        assert_eq!(core.session.state(), SessionState::Terminated);
        assert!(core.session.terminated_reason().unwrap_or("").contains("code 2"));
    }
}
