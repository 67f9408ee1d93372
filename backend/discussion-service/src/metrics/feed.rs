use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Duration of feed page fetches by ordering strategy.
    pub static ref FEED_FETCH_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "feed_fetch_duration_seconds",
        "Feed page fetch duration segmented by ordering strategy",
        &["order"]
    )
    .expect("failed to register feed_fetch_duration_seconds");

    /// Feed page fetches by ordering strategy and result (ok/error).
    pub static ref FEED_FETCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feed_fetch_total",
        "Total feed page fetches segmented by ordering strategy and result",
        &["order", "result"]
    )
    .expect("failed to register feed_fetch_total");

    /// Items returned per page.
    pub static ref FEED_PAGE_SIZE: HistogramVec = register_histogram_vec!(
        "feed_page_size",
        "Number of posts returned per feed page",
        &["order"],
        vec![0.0, 1.0, 5.0, 10.0, 20.0, 50.0, 100.0]
    )
    .expect("failed to register feed_page_size");
}
