mod dispatch;
mod helpers;
mod watcher;
