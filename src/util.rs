pub(crate) fn mention(user_id: u64) -> String {
    format!("<@{}>", user_id)
}

pub(crate) fn channel_mention(channel_id: u64) -> String {
    format!("<#{}>", channel_id)
}
