pub mod leaf;
pub mod pair;

pub use leaf::{LeafPage, LevelKeys, LEAF_EPSILON, LEAF_HEADER_SIZE, LEAF_MAGIC};
pub use pair::{pair_size, MAX_KEY_SIZE, MAX_VALUE_SIZE};
