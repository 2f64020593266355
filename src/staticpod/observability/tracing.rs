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

//! Span bookkeeping for reconcile passes. Each pass runs inside a `tracing`
//! span and a task-local [`TraceContext`] so the logger can stamp every line
//! emitted during the pass with the same `trace_id` / `span_id` pair.

use rand::{rngs::OsRng, RngCore};
use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::task_local;
use tracing::Instrument;
use tracing_subscriber::registry::Registry;

#[derive(Clone, Debug)]
pub struct TraceContext {
    trace_id: Arc<str>,
    span_id: Arc<str>,
}

impl TraceContext {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }
}

task_local! {
    static ACTIVE_TRACE: TraceContext;
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once; a subscriber installed by the host
/// process wins.
pub fn init() {
    TRACING_INIT.get_or_init(|| {
        let _ = tracing::subscriber::set_global_default(Registry::default());
    });
}

pub fn current_context() -> Option<TraceContext> {
    ACTIVE_TRACE.try_with(|ctx| ctx.clone()).ok()
}

/// Runs `fut` inside a span named `span_name`. Nested calls keep the parent
/// trace id and mint a fresh span id.
pub async fn with_span<T>(
    component: &'static str,
    span_name: impl Into<String>,
    fut: impl Future<Output = T>,
) -> T {
    let trace_id = current_context()
        .map(|ctx| ctx.trace_id)
        .unwrap_or_else(|| Arc::<str>::from(random_hex(16)));
    let span_id = Arc::<str>::from(random_hex(8));
    let context = TraceContext {
        trace_id: trace_id.clone(),
        span_id: span_id.clone(),
    };
    let name = span_name.into();
    let span = tracing::info_span!(
        "staticpod",
        component = component,
        span = name.as_str(),
        trace_id = trace_id.as_ref(),
        span_id = span_id.as_ref(),
    );

    ACTIVE_TRACE.scope(context, fut.instrument(span)).await
}

/// Synchronous counterpart of [`with_span`] for work that runs on a blocking
/// thread, where the task-local of the async caller is not visible.
pub fn with_span_sync<T>(
    component: &'static str,
    span_name: &str,
    parent: Option<TraceContext>,
    f: impl FnOnce() -> T,
) -> T {
    let trace_id = parent
        .map(|ctx| ctx.trace_id)
        .unwrap_or_else(|| Arc::<str>::from(random_hex(16)));
    let span_id = Arc::<str>::from(random_hex(8));
    let span = tracing::info_span!(
        "staticpod",
        component = component,
        span = span_name,
        trace_id = trace_id.as_ref(),
        span_id = span_id.as_ref(),
    );
    let _guard = span.enter();
    ACTIVE_TRACE.sync_scope(TraceContext { trace_id, span_id }, f)
}

fn random_hex(bytes: usize) -> String {
    let mut data = vec![0u8; bytes];
    OsRng.fill_bytes(&mut data);
    let mut output = String::with_capacity(bytes * 2);
    for byte in data {
        let _ = write!(&mut output, "{:02x}", byte);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_spans_share_trace_id() {
        init();
        let (outer, inner) = with_span("test", "outer", async {
            let outer = current_context().expect("outer context");
            let inner = with_span("test", "inner", async {
                current_context().expect("inner context")
            })
            .await;
            (outer, inner)
        })
        .await;

        assert_eq!(outer.trace_id(), inner.trace_id());
        assert_ne!(outer.span_id(), inner.span_id());
        assert_eq!(outer.trace_id().len(), 32);
        assert!(current_context().is_none());
    }

    #[test]
    fn sync_span_inherits_parent_trace() {
        let parent = TraceContext {
            trace_id: Arc::from("abc"),
            span_id: Arc::from("def"),
        };
        let seen = with_span_sync("test", "blocking", Some(parent), || {
            current_context().expect("context inside sync scope")
        });
        assert_eq!(seen.trace_id(), "abc");
        assert_ne!(seen.span_id(), "def");
    }
}
