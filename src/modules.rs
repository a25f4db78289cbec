pub(crate) mod danbooru;
pub(crate) mod stats;
