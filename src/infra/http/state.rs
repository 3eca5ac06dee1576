use std::sync::Arc;

use crate::application::discussions::DiscussionService;

#[derive(Clone)]
pub struct HttpState {
    pub discussions: Arc<DiscussionService>,
}

impl HttpState {
    pub fn new(discussions: Arc<DiscussionService>) -> Self {
        Self { discussions }
    }
}
