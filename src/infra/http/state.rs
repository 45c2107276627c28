use std::sync::Arc;

use crate::application::feed::FeedService;
use crate::application::follows::FollowService;
use crate::application::publish::PublicationService;
use crate::application::repos::HealthRepo;
use crate::application::users::UserService;

#[derive(Clone)]
pub struct ApiState {
    pub users: UserService,
    pub follows: FollowService,
    pub publications: PublicationService,
    pub feed: FeedService,
    pub health: Arc<dyn HealthRepo>,
}
