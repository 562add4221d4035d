mod node_handler_tests;
#[cfg(unix)]
mod process_context_tests;
