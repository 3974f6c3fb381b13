pub mod kcore;
