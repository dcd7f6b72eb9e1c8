//! 单个代理的验证：按固定顺序尝试各目标地址，第一个成功即返回。
//!
//! 一次成功已经足以证明出口可用，因此不再探测剩余目标。

use crate::common::error::{HarvestError, Result};
use crate::model::{CandidateProxy, ProbeOutcome};
use crate::service::probe::{endpoint_label, Probe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Clone)]
pub struct ProxyValidator {
    probe: Arc<dyn Probe>,
    targets: Arc<[String]>,
    timeout: Duration,
}

impl ProxyValidator {
    pub fn new(probe: Arc<dyn Probe>, targets: Vec<String>, timeout: Duration) -> Result<Self> {
        if targets.is_empty() {
            return Err(HarvestError::Config("至少需要一个测试地址".into()));
        }
        Ok(Self {
            probe,
            targets: targets.into(),
            timeout,
        })
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub async fn validate(&self, candidate: &CandidateProxy) -> ProbeOutcome {
        let start = Instant::now();

        for target in self.targets.iter() {
            let outcome = self.probe.probe(candidate, target, self.timeout).await;
            if outcome.success {
                return outcome;
            }
            trace!("{} ✗ {}", candidate, outcome.endpoint_label);
        }

        let attempted: Vec<String> = self.targets.iter().map(|t| endpoint_label(t)).collect();
        ProbeOutcome::failure(
            start.elapsed().as_secs_f64(),
            format!("failed all targets: {}", attempted.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyKind;
    use crate::service::probe::mock::ScriptedProbe;

    const T1: &str = "http://httpbin.org/get";
    const T2: &str = "https://api.ipify.org";
    const T3: &str = "https://www.google.com";

    fn targets() -> Vec<String> {
        vec![T1.into(), T2.into(), T3.into()]
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_success() {
        let probe = Arc::new(ScriptedProbe::new().succeed("a:1", T2).succeed("a:1", T3));
        let validator = ProxyValidator::new(probe.clone(), targets(), Duration::from_secs(1)).unwrap();

        let outcome = validator.validate(&CandidateProxy::new("a:1", ProxyKind::Http)).await;
        assert!(outcome.success);
        assert_eq!(outcome.endpoint_label, "api.ipify.org");
        assert_eq!(probe.calls_for("a:1"), vec![T1.to_string(), T2.to_string()]);
    }

    #[tokio::test]
    async fn test_all_targets_fail_names_every_target() {
        let probe = Arc::new(ScriptedProbe::new());
        let validator = ProxyValidator::new(probe.clone(), targets(), Duration::from_secs(1)).unwrap();

        let outcome = validator.validate(&CandidateProxy::new("b:1", ProxyKind::Socks4)).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.endpoint_label,
            "failed all targets: httpbin.org, api.ipify.org, www.google.com"
        );
        assert_eq!(probe.calls_for("b:1").len(), 3);
    }

    #[tokio::test]
    async fn test_chosen_target_is_stable_across_runs() {
        let probe = Arc::new(ScriptedProbe::new().succeed("c:1", T3).succeed("c:1", T2));
        let validator = ProxyValidator::new(probe, targets(), Duration::from_secs(1)).unwrap();
        let candidate = CandidateProxy::new("c:1", ProxyKind::Socks5);

        for _ in 0..5 {
            let outcome = validator.validate(&candidate).await;
            assert_eq!(outcome.endpoint_label, "api.ipify.org");
        }
    }

    #[test]
    fn test_empty_targets_rejected() {
        let probe = Arc::new(ScriptedProbe::new());
        assert!(ProxyValidator::new(probe, Vec::new(), Duration::from_secs(1)).is_err());
    }
}
