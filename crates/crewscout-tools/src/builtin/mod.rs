pub mod google_search;
