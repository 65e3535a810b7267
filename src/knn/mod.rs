// Tree construction, tree search and the linear-scan reference they are checked against.
pub mod kd_tree;
pub mod search;
pub mod brute_force;
