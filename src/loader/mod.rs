pub mod rspec;
