mod common;

mod api_tests;
mod producer_tests;
mod service_tests;
