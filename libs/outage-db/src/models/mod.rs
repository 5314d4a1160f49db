pub mod outage;
