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

//! Rollout log lines.
//!
//! Every line names the component that wrote it and, inside a traced pass,
//! the trace and span ids. Node, pod and generation fields are typed so JSON
//! output keeps generations as numbers.
//!
//! ```ignore
//! LogEntry::info(COMPONENT, "Node moving to new state")
//!     .node(&status.node_name)
//!     .generation("target", status.target_deployment_generation)
//!     .emit();
//! ```

use crate::staticpod::observability::tracing;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::fmt::Display;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

const SERVICE_NAME: &str = "staticpod-operator";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "logfmt" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

static JSON_OUTPUT: AtomicBool = AtomicBool::new(false);

pub fn set_log_format(format: LogFormat) {
    JSON_OUTPUT.store(format == LogFormat::Json, Ordering::Relaxed);
}

fn current_log_format() -> LogFormat {
    if JSON_OUTPUT.load(Ordering::Relaxed) {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Number(i64),
}

/// A log line under construction. Nothing is written until [`LogEntry::emit`].
#[derive(Debug, Clone)]
pub struct LogEntry {
    level: Level,
    component: &'static str,
    message: String,
    fields: Vec<(&'static str, FieldValue)>,
}

impl LogEntry {
    pub fn new(level: Level, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            component,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn debug(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::Debug, component, message)
    }

    pub fn info(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::Info, component, message)
    }

    pub fn warn(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::Warn, component, message)
    }

    pub fn error(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::Error, component, message)
    }

    pub fn node(self, node_name: &str) -> Self {
        self.text("node", node_name)
    }

    pub fn pod(self, pod_name: &str) -> Self {
        self.text("pod", pod_name)
    }

    pub fn namespace(self, namespace: &str) -> Self {
        self.text("namespace", namespace)
    }

    /// A deployment generation under `key`, e.g. `current` or `target`.
    pub fn generation(mut self, key: &'static str, generation: i32) -> Self {
        self.fields.push((key, FieldValue::Number(generation.into())));
        self
    }

    pub fn failure(self, err: &dyn Display) -> Self {
        self.text("error", err)
    }

    pub fn millis(mut self, key: &'static str, millis: u128) -> Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        self.fields.push((key, FieldValue::Number(millis)));
        self
    }

    pub fn text(mut self, key: &'static str, value: impl Display) -> Self {
        self.fields.push((key, FieldValue::Text(value.to_string())));
        self
    }

    pub fn render(&self, format: LogFormat) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let trace = tracing::current_context();
        let mut pairs: Vec<(&'static str, FieldValue)> = vec![
            ("ts", FieldValue::Text(timestamp)),
            ("level", FieldValue::Text(self.level.as_str().to_string())),
            ("service", FieldValue::Text(SERVICE_NAME.to_string())),
            ("component", FieldValue::Text(self.component.to_string())),
            ("msg", FieldValue::Text(self.message.clone())),
        ];
        if let Some(ctx) = trace {
            pairs.push(("trace_id", FieldValue::Text(ctx.trace_id().to_string())));
            pairs.push(("span_id", FieldValue::Text(ctx.span_id().to_string())));
        }
        pairs.extend(self.fields.iter().cloned());

        match format {
            LogFormat::Text => pairs
                .iter()
                .map(|(key, value)| match value {
                    FieldValue::Number(number) => format!("{}={}", key, number),
                    FieldValue::Text(text) if needs_quotes(text) => format!("{}={:?}", key, text),
                    FieldValue::Text(text) => format!("{}={}", key, text),
                })
                .collect::<Vec<_>>()
                .join(" "),
            LogFormat::Json => {
                let object: Map<String, Value> = pairs
                    .into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            FieldValue::Number(number) => json!(number),
                            FieldValue::Text(text) => Value::String(text),
                        };
                        (key.to_string(), value)
                    })
                    .collect();
                Value::Object(object).to_string()
            }
        }
    }

    /// Writes the line. Warnings and errors go to stderr.
    pub fn emit(self) {
        let line = self.render(current_log_format());
        let _ = match self.level {
            Level::Warn | Level::Error => writeln!(std::io::stderr().lock(), "{}", line),
            Level::Debug | Level::Info => writeln!(std::io::stdout().lock(), "{}", line),
        };
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '='))
}
