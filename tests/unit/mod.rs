mod property_tests;
mod recovery_tests;
mod scenario_tests;
