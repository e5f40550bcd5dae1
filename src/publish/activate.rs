//! Headless activation of interactors and inputs
//!
//! Interactive elements in a Mosaic visualization defer work (most notably
//! building preaggregated views) until a user first touches them. Activating
//! each one in a fixed order, and waiting for the engine to settle after
//! every step, makes that work happen before the data is exported.

use crate::coordinator::QueryMonitor;
use crate::render::{ActivationTarget, Client, ClientId, InteractorId, RenderContext};
use crate::{PublishError, Result};
use indexmap::IndexSet;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationSettings {
    /// How often the pending counter is read while waiting
    pub poll_interval: Duration,
    /// Upper bound on the wait after one activation
    pub timeout: Duration,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_ACTIVATION_TIMEOUT,
        }
    }
}

/// Interactors and activatable inputs of a mounted visualization, in
/// discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activatables {
    pub interactors: IndexSet<InteractorId>,
    pub inputs: IndexSet<ClientId>,
}

impl Activatables {
    /// Walk the clients in mount order
    ///
    /// A plot shared by several marks contributes its interactors once.
    pub fn discover(ctx: &RenderContext) -> Self {
        let mut found = Self::default();
        for client in ctx.clients() {
            match client {
                Client::Input(_) => {
                    if client.as_activatable().is_some() {
                        found.inputs.insert(client.id());
                    }
                }
                Client::Mark(mark) => {
                    if let Some(plot) = ctx.plot(mark.plot) {
                        found.interactors.extend(plot.interactors.iter().copied());
                    }
                }
            }
        }
        found
    }

    pub fn is_interactive(&self) -> bool {
        !self.interactors.is_empty() || !self.inputs.is_empty()
    }

    /// Interactors first, then inputs
    pub fn targets(&self) -> impl Iterator<Item = ActivationTarget> + '_ {
        self.interactors
            .iter()
            .map(|id| ActivationTarget::Interactor(*id))
            .chain(self.inputs.iter().map(|id| ActivationTarget::Input(*id)))
    }

    pub fn len(&self) -> usize {
        self.interactors.len() + self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationStep {
    pub label: String,
    /// Times the pending counter was found non-zero
    pub polls: usize,
    /// Pending requests observed after the wait
    pub pending: usize,
    /// Preaggregated views this step requested
    pub views: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivationReport {
    pub steps: Vec<ActivationStep>,
}

impl ActivationReport {
    pub fn views(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|step| step.views.iter().map(String::as_str))
    }
}

/// Wait until `monitor` reports no pending requests
///
/// Returns the number of polls that found work still pending. Fails with
/// `ActivationTimeout` after `settings.timeout`, with `Cancelled` as soon as
/// `cancel` fires, and with any engine failure nobody was waiting for.
pub async fn wait_for_quiescence(
    monitor: &dyn QueryMonitor,
    settings: &ActivationSettings,
    cancel: &CancellationToken,
    target: &str,
) -> Result<usize> {
    let started = Instant::now();
    let mut polls = 0;
    let settle = async {
        while monitor.pending_exec() > 0 {
            polls += 1;
            tokio::time::sleep(settings.poll_interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PublishError::Cancelled),
        settled = tokio::time::timeout(settings.timeout, settle) => {
            if settled.is_err() {
                return Err(PublishError::ActivationTimeout {
                    target: target.to_string(),
                    pending: monitor.pending_exec(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    if let Some(failure) = monitor.take_failure() {
        return Err(failure);
    }
    Ok(polls)
}

/// Activates every discovered element, one at a time
pub struct ActivationSimulator<'a> {
    ctx: &'a RenderContext,
    settings: ActivationSettings,
    cancel: CancellationToken,
}

impl<'a> ActivationSimulator<'a> {
    pub fn new(ctx: &'a RenderContext) -> Self {
        Self {
            ctx,
            settings: ActivationSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: ActivationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, activatables: &Activatables) -> Result<ActivationReport> {
        let mut report = ActivationReport::default();
        for target in activatables.targets() {
            if self.cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            let activation = self.ctx.activate(target)?;
            let polls = wait_for_quiescence(
                self.ctx.coordinator(),
                &self.settings,
                &self.cancel,
                &activation.label,
            )
            .await?;
            let pending = self.ctx.coordinator().pending_exec();
            tracing::debug!(target = %activation.label, polls, pending, "settled");
            report.steps.push(ActivationStep {
                label: activation.label,
                polls,
                pending,
                views: activation.views,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use crate::render::mount;
    use crate::spec::parse_spec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Reports pending work for a fixed number of reads
    struct Countdown(AtomicUsize);

    impl QueryMonitor for Countdown {
        fn pending_exec(&self) -> usize {
            let left = self.0.load(Ordering::SeqCst);
            if left > 0 {
                self.0.store(left - 1, Ordering::SeqCst);
            }
            left
        }
    }

    struct Stuck;

    impl QueryMonitor for Stuck {
        fn pending_exec(&self) -> usize {
            1
        }
    }

    fn fast() -> ActivationSettings {
        ActivationSettings {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_waits_until_settled() {
        let monitor = Countdown(AtomicUsize::new(3));
        let polls = wait_for_quiescence(&monitor, &fast(), &CancellationToken::new(), "t")
            .await
            .unwrap();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = wait_for_quiescence(&Stuck, &fast(), &CancellationToken::new(), "intervalX#0")
            .await
            .unwrap_err();
        match err {
            PublishError::ActivationTimeout {
                target, pending, ..
            } => {
                assert_eq!(target, "intervalX#0");
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let settings = ActivationSettings {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(60),
        };
        let err = wait_for_quiescence(&Stuck, &settings, &cancel, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Cancelled));
    }

    const LINKED: &str = r#"
data:
  t:
    query: SELECT range AS a, range % 7 AS b, range % 3 AS c FROM range(50)
params:
  sel: { select: crossfilter }
hconcat:
  - input: menu
    from: t
    column: c
    as: $sel
  - plot:
      - mark: barY
        data: { from: t, filterBy: $sel }
        x: b
        y: { count: }
      - mark: ruleY
        data: { from: t }
        y: { max: a }
      - select: intervalX
        as: $sel
      - select: toggleY
        as: $sel
  - plot:
      - mark: barY
        data: { from: t, filterBy: $sel }
        x: c
        y: { sum: a }
      - select: intervalX
        as: $sel
"#;

    async fn mounted() -> RenderContext {
        let spec = parse_spec(LINKED).unwrap();
        let coordinator = Arc::new(Coordinator::open("duckdb://memory").unwrap());
        let mut ctx = RenderContext::new(coordinator);
        mount(&spec, &mut ctx).await.unwrap();
        ctx.clients_ready().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_discovery_order() {
        let ctx = mounted().await;
        let found = Activatables::discover(&ctx);

        assert!(found.is_interactive());
        // Two marks share the first plot; its interactors appear once
        assert_eq!(found.interactors.len(), 3);
        assert_eq!(found.inputs.len(), 1);
        let targets: Vec<_> = found.targets().collect();
        assert!(matches!(targets[0], ActivationTarget::Interactor(_)));
        assert!(matches!(targets[3], ActivationTarget::Input(_)));
    }

    #[tokio::test]
    async fn test_run_is_deterministic() {
        let labels = |report: &ActivationReport| -> Vec<String> {
            report.steps.iter().map(|s| s.label.clone()).collect()
        };

        let first = {
            let ctx = mounted().await;
            let found = Activatables::discover(&ctx);
            ActivationSimulator::new(&ctx)
                .with_settings(fast())
                .run(&found)
                .await
                .unwrap()
        };
        let second = {
            let ctx = mounted().await;
            let found = Activatables::discover(&ctx);
            ActivationSimulator::new(&ctx)
                .with_settings(fast())
                .run(&found)
                .await
                .unwrap()
        };

        assert_eq!(labels(&first), labels(&second));
        assert_eq!(
            first.views().collect::<Vec<_>>(),
            second.views().collect::<Vec<_>>()
        );
        assert_eq!(
            labels(&first),
            vec!["intervalX#0", "toggleY#1", "intervalX#2", "menu(c)"]
        );
        assert!(first.views().count() > 0);
        assert!(first.steps.iter().all(|step| step.pending == 0));
    }

    #[tokio::test]
    async fn test_static_layout_is_not_interactive() {
        let spec = parse_spec(
            "data:\n  t:\n    query: SELECT 1 AS a\nplot:\n  - mark: dot\n    data: { from: t }\n    x: a\n",
        )
        .unwrap();
        let coordinator = Arc::new(Coordinator::open("duckdb://memory").unwrap());
        let mut ctx = RenderContext::new(coordinator);
        mount(&spec, &mut ctx).await.unwrap();
        assert!(!Activatables::discover(&ctx).is_interactive());
    }
}
