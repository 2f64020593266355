/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::error::Error;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static SYNCS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static SYNC_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static NODE_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static INSTALLER_PODS_CREATED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static LATEST_AVAILABLE_GENERATION: OnceLock<IntGauge> = OnceLock::new();
static NODES_FAILING: OnceLock<IntGauge> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("staticpod".to_string()), None)
            .expect("failed to initialise staticpod metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register staticpod metric collector");
    collector
}

fn syncs_total() -> &'static IntCounterVec {
    SYNCS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "installer_syncs_total",
            "Installer controller reconcile passes grouped by result",
        );
        let counter =
            IntCounterVec::new(opts, &["result"]).expect("failed to build sync counter");
        register_collector(counter)
    })
}

fn sync_duration() -> &'static HistogramVec {
    SYNC_DURATION.get_or_init(|| {
        let opts = HistogramOpts::new(
            "installer_sync_duration_seconds",
            "Wall-clock duration of installer controller reconcile passes",
        );
        let histogram =
            HistogramVec::new(opts, &["result"]).expect("failed to build sync histogram");
        register_collector(histogram)
    })
}

fn node_transitions_total() -> &'static IntCounterVec {
    NODE_TRANSITIONS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "installer_node_transitions_total",
            "Persisted per-node rollout transitions grouped by kind",
        );
        let counter = IntCounterVec::new(opts, &["transition"])
            .expect("failed to build node transition counter");
        register_collector(counter)
    })
}

fn installer_pods_created_total() -> &'static IntCounter {
    INSTALLER_PODS_CREATED_TOTAL.get_or_init(|| {
        let counter = IntCounter::new(
            "installer_pods_created_total",
            "Installer pods created by the controller",
        )
        .expect("failed to build installer pod counter");
        register_collector(counter)
    })
}

fn latest_available_generation() -> &'static IntGauge {
    LATEST_AVAILABLE_GENERATION.get_or_init(|| {
        let gauge = IntGauge::new(
            "latest_available_generation",
            "Latest deployment generation published for the static pod",
        )
        .expect("failed to build latest generation gauge");
        register_collector(gauge)
    })
}

fn nodes_failing() -> &'static IntGauge {
    NODES_FAILING.get_or_init(|| {
        let gauge = IntGauge::new(
            "nodes_failing",
            "Nodes whose last installation attempt failed",
        )
        .expect("failed to build failing nodes gauge");
        register_collector(gauge)
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncResult {
    Success,
    Requeue,
    Error,
}

impl SyncResult {
    fn as_label(self) -> &'static str {
        match self {
            SyncResult::Success => "success",
            SyncResult::Requeue => "requeue",
            SyncResult::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeTransition {
    TargetSet,
    Installed,
    Failed,
    Progressed,
}

impl NodeTransition {
    fn as_label(self) -> &'static str {
        match self {
            NodeTransition::TargetSet => "target_set",
            NodeTransition::Installed => "installed",
            NodeTransition::Failed => "failed",
            NodeTransition::Progressed => "progressed",
        }
    }
}

pub fn record_sync(result: SyncResult, elapsed: Duration) {
    syncs_total().with_label_values(&[result.as_label()]).inc();
    sync_duration()
        .with_label_values(&[result.as_label()])
        .observe(elapsed.as_secs_f64());
}

pub fn record_node_transition(transition: NodeTransition) {
    node_transitions_total()
        .with_label_values(&[transition.as_label()])
        .inc();
}

pub fn record_installer_pod_created() {
    installer_pods_created_total().inc();
}

pub fn set_fleet_gauges(latest_available: i32, failing: usize) {
    latest_available_generation().set(i64::from(latest_available));
    nodes_failing().set(failing as i64);
}

/// Encodes every registered metric in the Prometheus text format.
pub fn gather() -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let metric_families = registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)?;
    Ok(buffer)
}
