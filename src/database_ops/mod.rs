pub mod db;
pub mod puzzles;
