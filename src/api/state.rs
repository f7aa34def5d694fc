use crate::scan::Scanner;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<Scanner>,
}
