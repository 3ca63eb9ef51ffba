mod log_entries;
mod sessions;
