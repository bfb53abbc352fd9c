mod test_concurrent_pin_compact;
mod test_log_db_factory;
mod test_reopen;
