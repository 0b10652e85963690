use gated_or_tb::model::OrUnit;
use gated_or_tb::sequence::dut_test;

gated_or_tb::run_with_model!(OrUnit::new(), dut_test);
