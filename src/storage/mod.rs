mod feed_file;

pub use feed_file::{
    ensure_dir, feed_file_name, parse_feed_file_name, write_feed, PersistError,
};
