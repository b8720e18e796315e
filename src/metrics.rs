//! Process metrics exposed at `/metrics` in the Prometheus text format.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub uploads_total: IntCounter,
    pub upload_bytes: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let uploads_total =
            IntCounter::new("video_uploads_total", "Videos stored and recorded")?;
        // 1 MiB .. 4 GiB
        let buckets = prometheus::exponential_buckets(1024.0 * 1024.0, 4.0, 7)?;
        let upload_bytes = Histogram::with_opts(
            HistogramOpts::new("video_upload_bytes", "Size of stored videos in bytes")
                .buckets(buckets),
        )?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(upload_bytes.clone()))?;
        Ok(Self {
            registry,
            uploads_total,
            upload_bytes,
        })
    }

    pub fn observe_upload(&self, bytes: u64) {
        self.uploads_total.inc();
        self.upload_bytes.observe(bytes as f64);
    }

    /// Render all registered metrics.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
