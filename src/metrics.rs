// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


use dashmap::DashMap;
use opentelemetry::{
    metrics::{Counter, Gauge, Meter, MeterProvider},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{SdkMeterProvider, Temporality};

use crate::prelude::*;

/// Lazily-registered counters and gauges over an OTLP exporter. `None` inside
/// means metrics are disabled and every call is a no-op, so call sites never
/// branch on configuration.
#[derive(Clone)]
pub struct Metrics(Option<Arc<MetricsInner>>);

struct MetricsInner {
    counters: DashMap<&'static str, Counter<u64>>,
    gauges: DashMap<&'static str, Gauge<u64>>,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
    meter: Meter,
}

impl Metrics {
    pub fn new(
        otel_endpoint: Option<impl AsRef<str>>,
        service_name: impl Into<String>,
        interval: Duration,
    ) -> Result<Metrics> {
        let provider = build_meter_provider(otel_endpoint, service_name.into(), interval)?;
        let meter = provider.meter("chain-archive");
        Ok(Metrics(Some(Arc::new(MetricsInner {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            provider,
            meter,
        }))))
    }

    pub fn none() -> Metrics {
        Metrics(None)
    }

    pub fn inc_counter(&self, metric: &'static str) {
        self.counter(metric, 1)
    }

    pub fn counter(&self, metric: &'static str, val: u64) {
        self.counter_with_attrs(metric, val, &[])
    }

    pub fn counter_with_attrs(&self, metric: &'static str, val: u64, attributes: &[KeyValue]) {
        if let Some(inner) = &self.0 {
            let counter = inner
                .counters
                .entry(metric)
                .or_insert_with(|| inner.meter.u64_counter(metric).build());
            counter.add(val, attributes)
        }
    }

    pub fn gauge(&self, metric: &'static str, value: u64) {
        if let Some(inner) = &self.0 {
            let gauge = inner
                .gauges
                .entry(metric)
                .or_insert_with(|| inner.meter.u64_gauge(metric).build());
            gauge.record(value, &[])
        }
    }
}

fn build_meter_provider(
    otel_endpoint: Option<impl AsRef<str>>,
    service_name: String,
    interval: Duration,
) -> Result<SdkMeterProvider> {
    let mut builder = SdkMeterProvider::builder().with_resource(
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                service_name,
            )])
            .build(),
    );

    if let Some(endpoint) = otel_endpoint {
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_temporality(Temporality::default())
            .with_timeout(interval * 2)
            .with_endpoint(endpoint.as_ref())
            .build()?;
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(interval / 2)
            .build();
        builder = builder.with_reader(reader);
    }

    Ok(builder.build())
}
