mod expansion_tests;
mod parser_tests;
mod pattern_tests;
mod redirect_tests;
mod snapshot_tests;
mod tokenizer_tests;
mod variable_tests;
