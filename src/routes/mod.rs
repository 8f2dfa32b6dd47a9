mod auth;
mod categories;
mod events;
mod friends;
mod health_check;
mod users;

pub use auth::{current_user, login, logout, signup};
pub use categories::{
    category_events, create_category, delete_category, get_category, list_categories,
    update_category,
};
pub use events::{
    accept_invitation, add_participant, create_event, delete_event, get_event, invite_friends,
    list_events, refuse_invitation, remove_participant, search_events, update_event,
};
pub use friends::{accept_request, list_friends, refuse_request, remove_friend, send_request};
pub use health_check::health_check;
pub use users::{delete_user, get_user, list_users, update_user};
