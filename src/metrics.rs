use std::sync::LazyLock;

use prometheus::*;

static METRIC_MATCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("iq_match_count", "count of match requests", &["size", "outcome"])
        .unwrap()
});

static METRIC_MATCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "iq_match_duration",
        "duration of the per-image match in seconds",
        &["size"]
    )
    .unwrap()
});

static METRIC_MATCH_VOTES: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "iq_match_votes",
        "accepted votes of the best candidate",
        (0..=100).step_by(5).map(|x| x as f64).collect()
    )
    .unwrap()
});

static METRIC_INDEXED_DESCRIPTORS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("iq_indexed_descriptors", "number of descriptors in the index").unwrap()
});

static METRIC_COMPUTED_IMAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("iq_computed_images", "count of images added by compute").unwrap()
});

/// 记录一次匹配
pub fn observe_match(size: (u32, u32), outcome: &str, duration: f32, best_votes: usize) {
    let size = to_fixed_size(size);
    METRIC_MATCH_COUNT.with_label_values(&[size, outcome]).inc();
    METRIC_MATCH_DURATION.with_label_values(&[size]).observe(duration as f64);
    METRIC_MATCH_VOTES.observe(best_votes as f64);
}

pub fn set_indexed_descriptors(n: usize) {
    METRIC_INDEXED_DESCRIPTORS.set(n as i64);
}

pub fn inc_computed_images() {
    METRIC_COMPUTED_IMAGES.inc();
}

/// 将图像面积范围调整到几个固定值
fn to_fixed_size((width, height): (u32, u32)) -> &'static str {
    let area = width as u64 * height as u64;
    if area <= 128 * 128 {
        "128"
    } else if area <= 256 * 256 {
        "256"
    } else if area <= 512 * 512 {
        "512"
    } else if area <= 1024 * 1024 {
        "1024"
    } else {
        "1024+"
    }
}
