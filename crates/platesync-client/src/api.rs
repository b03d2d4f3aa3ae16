//! Backend route table.
//!
//! One function per backend call. Each returns an unauthenticated
//! [`ApiRequest`]; the caller attaches the token it read from the session.
//! Car-scoped reads carry the acting car so the backend can fill in
//! "liked by me" / "followed by me".

use serde_json::json;

use platesync_net::ApiRequest;
use platesync_shared::types::{CarId, ChatId, CommentId, NotificationId, PostId};

fn enc(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn with_car(path: &str, car: Option<CarId>) -> String {
    match car {
        Some(car) => format!("{path}?car_id={car}"),
        None => path.to_string(),
    }
}

// -- Auth -------------------------------------------------------------------

pub fn login(email: &str, password: &str) -> ApiRequest {
    ApiRequest::post("/auth/login").with_body(json!({ "email": email, "password": password }))
}

pub fn register(email: &str, password: &str) -> ApiRequest {
    ApiRequest::post("/auth/register").with_body(json!({ "email": email, "password": password }))
}

pub fn change_password(current: &str, new: &str) -> ApiRequest {
    ApiRequest::put("/auth/password").with_body(json!({
        "current_password": current,
        "new_password": new,
    }))
}

// -- Feed -------------------------------------------------------------------

pub fn news_feed(car: Option<CarId>) -> ApiRequest {
    ApiRequest::get(with_car("/posts/feed", car))
}

pub fn following_feed(car: CarId) -> ApiRequest {
    ApiRequest::get(with_car("/posts/following", Some(car)))
}

pub fn car_posts(author: CarId, viewer: Option<CarId>) -> ApiRequest {
    ApiRequest::get(with_car(&format!("/cars/{author}/posts"), viewer))
}

pub fn toggle_post_like(post: PostId, car: CarId) -> ApiRequest {
    ApiRequest::post(format!("/posts/{post}/like")).with_body(json!({ "car_id": car }))
}

pub fn create_post(car: CarId, description: &str, images: &[String]) -> ApiRequest {
    ApiRequest::post("/posts").with_body(json!({
        "car_id": car,
        "description": description,
        "images": images,
    }))
}

pub fn edit_post(post: PostId, description: &str) -> ApiRequest {
    ApiRequest::put(format!("/posts/{post}")).with_body(json!({ "description": description }))
}

pub fn delete_post(post: PostId) -> ApiRequest {
    ApiRequest::delete(format!("/posts/{post}"))
}

// -- Comments ---------------------------------------------------------------

pub fn list_comments(post: PostId, car: Option<CarId>) -> ApiRequest {
    ApiRequest::get(with_car(&format!("/posts/{post}/comments"), car))
}

pub fn create_comment(post: PostId, car: CarId, text: &str) -> ApiRequest {
    ApiRequest::post(format!("/posts/{post}/comments"))
        .with_body(json!({ "car_id": car, "text": text }))
}

pub fn edit_comment(comment: CommentId, text: &str) -> ApiRequest {
    ApiRequest::put(format!("/comments/{comment}")).with_body(json!({ "text": text }))
}

pub fn delete_comment(comment: CommentId) -> ApiRequest {
    ApiRequest::delete(format!("/comments/{comment}"))
}

pub fn toggle_comment_like(comment: CommentId, car: CarId) -> ApiRequest {
    ApiRequest::post(format!("/comments/{comment}/like")).with_body(json!({ "car_id": car }))
}

// -- Chats ------------------------------------------------------------------

pub fn list_chats(car: CarId) -> ApiRequest {
    ApiRequest::get(with_car("/chats", Some(car)))
}

pub fn open_chat(car: CarId, other: CarId) -> ApiRequest {
    ApiRequest::post("/chats").with_body(json!({ "car_id": car, "other_car_id": other }))
}

pub fn list_messages(chat: ChatId) -> ApiRequest {
    ApiRequest::get(format!("/chats/{chat}/messages"))
}

pub fn send_message(chat: ChatId, car: CarId, text: &str) -> ApiRequest {
    ApiRequest::post(format!("/chats/{chat}/messages"))
        .with_body(json!({ "car_id": car, "text": text }))
}

pub fn mark_chat_read(chat: ChatId, car: CarId) -> ApiRequest {
    ApiRequest::post(format!("/chats/{chat}/read")).with_body(json!({ "car_id": car }))
}

pub fn read_status(chat: ChatId, car: CarId) -> ApiRequest {
    ApiRequest::get(with_car(&format!("/chats/{chat}/read-status"), Some(car)))
}

// -- Cars -------------------------------------------------------------------

pub fn my_cars() -> ApiRequest {
    ApiRequest::get("/cars/mine")
}

pub fn add_car(plate: &str) -> ApiRequest {
    ApiRequest::post("/cars").with_body(json!({ "plate": plate }))
}

pub fn set_active_car(car: CarId) -> ApiRequest {
    ApiRequest::post(format!("/cars/{car}/activate"))
}

pub fn update_bio(car: CarId, bio: &str) -> ApiRequest {
    ApiRequest::put(format!("/cars/{car}")).with_body(json!({ "bio": bio }))
}

pub fn delete_car(car: CarId) -> ApiRequest {
    ApiRequest::delete(format!("/cars/{car}"))
}

pub fn car_profile(car: CarId) -> ApiRequest {
    ApiRequest::get(format!("/cars/{car}"))
}

pub fn search_cars(plate: &str) -> ApiRequest {
    ApiRequest::get(format!("/cars/search?plate={}", enc(plate)))
}

pub fn follow(target: CarId, car: CarId) -> ApiRequest {
    ApiRequest::post(format!("/cars/{target}/follow")).with_body(json!({ "car_id": car }))
}

pub fn unfollow(target: CarId, car: CarId) -> ApiRequest {
    ApiRequest::delete(with_car(&format!("/cars/{target}/follow"), Some(car)))
}

pub fn car_stats(car: CarId, viewer: Option<CarId>) -> ApiRequest {
    ApiRequest::get(with_car(&format!("/cars/{car}/stats"), viewer))
}

pub fn followers(car: CarId) -> ApiRequest {
    ApiRequest::get(format!("/cars/{car}/followers"))
}

pub fn following(car: CarId) -> ApiRequest {
    ApiRequest::get(format!("/cars/{car}/following"))
}

// -- Notifications ----------------------------------------------------------

pub fn list_notifications(car: CarId) -> ApiRequest {
    ApiRequest::get(with_car("/notifications", Some(car)))
}

pub fn mark_notification_read(id: NotificationId) -> ApiRequest {
    ApiRequest::put(format!("/notifications/{id}/read"))
}

pub fn mark_all_notifications_read(car: CarId) -> ApiRequest {
    ApiRequest::put(with_car("/notifications/read-all", Some(car)))
}

pub fn register_push_token(token: &str) -> ApiRequest {
    ApiRequest::post("/notifications/push-token").with_body(json!({ "token": token }))
}
