use serde::{Deserialize, Serialize};

use crate::models::{Account, Post};

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct ProviderCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginPageResponse {
    pub provider_url: String,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUsernameRequest {
    pub username: Option<String>,
}

/// State of the registration step shown after a first provider login.
#[derive(Debug, Serialize)]
pub struct RegisterPageResponse {
    pub pending: bool,
    pub error: Option<String>,
}

// -- Posts --

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

/// A post as rendered in listings, with its cached cover (empty when unknown).
#[derive(Debug, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub cover_image_url: String,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub posts: Vec<PostView>,
    pub viewer: Option<Account>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub account: Account,
    pub posts: Vec<PostView>,
}

// -- Covers --

#[derive(Debug, Serialize)]
pub struct CoverResponse {
    pub title: String,
    pub cover_image_url: String,
}

/// Every thumbnail the catalog has for a fixed query.
#[derive(Debug, Serialize)]
pub struct BookGalleryResponse {
    pub query: String,
    pub cover_images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
