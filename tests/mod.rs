mod support;

mod resilience_tests;
