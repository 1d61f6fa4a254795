//! End-to-end tests: in-memory market and chat doubles driving the real
//! strategy, executor, notification channel and scan loop.

mod mock_market;
mod pipeline;
