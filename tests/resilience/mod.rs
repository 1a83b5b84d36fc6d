mod backoff_properties;
mod idempotency_test;
