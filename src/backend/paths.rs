//! Where things live, in the document tree and in blob storage.

pub const USERS: &str = "users";

pub fn profile(user_id: &str) -> String {
    format!("users/{}/profile", user_id)
}

pub fn posts(user_id: &str) -> String {
    format!("users/{}/posts", user_id)
}

pub fn post(user_id: &str, post_id: &str) -> String {
    format!("users/{}/posts/{}", user_id, post_id)
}

pub fn likes(user_id: &str, post_id: &str) -> String {
    format!("users/{}/posts/{}/likes", user_id, post_id)
}

pub fn like(user_id: &str, post_id: &str, viewer_id: &str) -> String {
    format!("users/{}/posts/{}/likes/{}", user_id, post_id, viewer_id)
}

pub fn avatar_blob(user_id: &str) -> String {
    format!("users/{}/profile.jpg", user_id)
}

pub fn banner_blob(user_id: &str) -> String {
    format!("users/{}/banner.jpg", user_id)
}

pub fn post_image_blob(user_id: &str, post_id: &str, slot: usize, ext: &str) -> String {
    format!("users/{}/posts/{}/image_{}.{}", user_id, post_id, slot, ext)
}

pub fn post_video_blob(user_id: &str, post_id: &str, ext: &str) -> String {
    format!("users/{}/posts/{}/video.{}", user_id, post_id, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(profile("u1"), "users/u1/profile");
        assert_eq!(like("u1", "p1", "v1"), "users/u1/posts/p1/likes/v1");
        assert_eq!(
            post_image_blob("u1", "p1", 2, "png"),
            "users/u1/posts/p1/image_2.png"
        );
        assert_eq!(post_video_blob("u1", "p1", "webm"), "users/u1/posts/p1/video.webm");
    }
}
