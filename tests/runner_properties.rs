// tests/runner_properties.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};
use crate::common::fakes::{SCRIPTED, registry_with_scripted};

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use taskgate::engine::{ChainOutcome, ChainRunner};
use taskgate::fs::mock::MockFileSystem;
use taskgate::store::Store;
use taskgate::types::{Chain, Direction, ErrorCode, TransferStep};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Ok,
    Warn,
    Fail,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![4 => Just(Step::Ok), 2 => Just(Step::Warn), 1 => Just(Step::Fail)]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn chain_stops_at_first_failure_and_reports_last_warning(
        steps in proptest::collection::vec(step_strategy(), 0..8)
    ) {
        let rt = runtime();
        let (h, _fs) = Harness::mock();

        let mut builder = RuleBuilder::new("prop", Direction::Receive);
        for (i, step) in steps.iter().enumerate() {
            let label = i.to_string();
            let outcome = match step {
                Step::Ok => "ok",
                Step::Warn => "warn",
                Step::Fail => "fail",
            };
            builder = builder.post(spec(SCRIPTED, &[("outcome", outcome), ("label", &label)]));
        }
        let mut ctx = ContextBuilder::new(builder.build(), TransferBuilder::new(0).build()).build();
        h.register(&mut ctx);

        let result = rt.block_on(h.run(Chain::Post, &mut ctx));
        let stored = h.store.transfer(ctx.transfer.id).unwrap();

        match steps.iter().position(|s| *s == Step::Fail) {
            Some(failed_at) => {
                prop_assert!(result.is_err());
                prop_assert_eq!(stored.task_number as usize, failed_at);
                prop_assert_eq!(stored.error.code, ErrorCode::ExternalOperation);
            }
            None => {
                let last_warn = steps.iter().rposition(|s| *s == Step::Warn);
                let expected = match last_warn {
                    Some(i) => ChainOutcome::CompletedWithWarning(format!("scripted warning {}", i)),
                    None => ChainOutcome::Completed,
                };
                prop_assert_eq!(result.unwrap(), expected);
                prop_assert_eq!(stored.task_number, 0);
                let code = if last_warn.is_some() { ErrorCode::Warning } else { ErrorCode::Ok };
                prop_assert_eq!(stored.error.code, code);
            }
        }
    }

    #[test]
    fn resume_runs_exactly_the_remaining_steps(
        (len, start) in (1usize..8).prop_flat_map(|len| (Just(len), 0..=len))
    ) {
        let rt = runtime();
        let (h, _fs) = Harness::mock();
        let ranks = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&ranks);
        let store: Arc<dyn Store> = h.store.clone();
        let runner = ChainRunner::new(
            Arc::new(registry_with_scripted()),
            store,
            Arc::new(MockFileSystem::new()),
        )
        .with_trace(move |step| {
            seen.lock().unwrap().push(step.rank);
            Ok(())
        });

        let mut builder = RuleBuilder::new("prop", Direction::Send);
        for _ in 0..len {
            builder = builder.pre(spec(SCRIPTED, &[]));
        }
        let mut ctx = ContextBuilder::new(builder.build(), TransferBuilder::new(0).build()).build();
        ctx.transfer.step = TransferStep::PreTasks;
        ctx.transfer.task_number = start as u32;
        h.register(&mut ctx);

        let outcome = rt.block_on(runner.run_chain(&CancellationToken::new(), Chain::Pre, &mut ctx, None));
        prop_assert_eq!(outcome.unwrap(), ChainOutcome::Completed);

        let expected: Vec<u32> = (start as u32..len as u32).collect();
        prop_assert_eq!(ranks.lock().unwrap().clone(), expected);
        prop_assert_eq!(ctx.transfer.task_number, 0);
    }
}
