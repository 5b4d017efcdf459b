use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// ImportMetrics はインポート実行の Prometheus メトリクス。
pub struct ImportMetrics {
    pub runs_started_total: IntCounterVec,
    pub runs_finished_total: IntCounterVec,
    pub records_processed_total: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,
    pub active_runs: IntGauge,
    registry: Registry,
}

impl ImportMetrics {
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let runs_started_total = IntCounterVec::new(
            Opts::new("folk_import_runs_started_total", "Total number of import runs started")
                .const_label("service", service_name),
            &["operation"],
        )?;

        let runs_finished_total = IntCounterVec::new(
            Opts::new(
                "folk_import_runs_finished_total",
                "Total number of import runs that reached a terminal status",
            )
            .const_label("service", service_name),
            &["operation", "status"],
        )?;

        let records_processed_total = IntCounterVec::new(
            Opts::new(
                "folk_import_records_processed_total",
                "Total number of source records processed by outcome",
            )
            .const_label("service", service_name),
            &["operation", "outcome"],
        )?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new(
                "folk_import_retry_attempts_total",
                "Total number of failed record retry attempts by result",
            )
            .const_label("service", service_name),
            &["result"],
        )?;

        let active_runs = IntGauge::with_opts(
            Opts::new("folk_import_active_runs", "Number of import runs currently executing")
                .const_label("service", service_name),
        )?;

        registry.register(Box::new(runs_started_total.clone()))?;
        registry.register(Box::new(runs_finished_total.clone()))?;
        registry.register(Box::new(records_processed_total.clone()))?;
        registry.register(Box::new(retry_attempts_total.clone()))?;
        registry.register(Box::new(active_runs.clone()))?;

        Ok(Self {
            runs_started_total,
            runs_finished_total,
            records_processed_total,
            retry_attempts_total,
            active_runs,
            registry,
        })
    }

    pub fn record_run_started(&self, operation: &str) {
        self.runs_started_total.with_label_values(&[operation]).inc();
        self.active_runs.inc();
    }

    pub fn record_run_finished(&self, operation: &str, status: &str) {
        self.runs_finished_total
            .with_label_values(&[operation, status])
            .inc();
        self.active_runs.dec();
    }

    pub fn record_outcome(&self, operation: &str, outcome: &str) {
        self.records_processed_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_retry(&self, result: &str) {
        self.retry_attempts_total.with_label_values(&[result]).inc();
    }

    /// Prometheus テキスト形式でメトリクスを出力する。
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
