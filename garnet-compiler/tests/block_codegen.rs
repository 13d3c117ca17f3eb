use std::path::PathBuf;

use garnet_compiler::runtime::Value;
use garnet_compiler::{Compilation, CompileOptions, Compiler, SourceFile, SourceId, Type};

fn compile(code: &str) -> anyhow::Result<Compilation> {
    let source_file = SourceFile::new(SourceId(0), PathBuf::from("test.gt"), code.to_string());
    let mut compiler = Compiler::new(CompileOptions::default());
    compiler.compile(&source_file).map_err(|err| {
        anyhow::anyhow!("{err}: {:?}", compiler.diagnostics().messages())
    })
}

fn run(code: &str) -> anyhow::Result<Value> {
    let compilation = compile(code)?;
    Ok(compilation.evaluate()?)
}

fn run_int(code: &str) -> anyhow::Result<i64> {
    match run(code)? {
        Value::Int(value) => Ok(value),
        other => anyhow::bail!("expected an Int result, got {other}"),
    }
}

#[test]
fn generates_inline_call() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

foo do
  1
end
"#;
    assert_eq!(run_int(code)?, 1);
    assert_eq!(compile(code)?.result_type(), Some(&Type::int()));
    Ok(())
}

#[test]
fn passes_yield_arguments() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield 1
end

foo do |x|
  x + 1
end
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn passes_arguments_to_yielder_function() -> anyhow::Result<()> {
    let code = r#"
def foo(a)
  yield a
end

foo(3) do |x|
  x + 1
end
"#;
    assert_eq!(run_int(code)?, 4);
    Ok(())
}

#[test]
fn passes_self_and_arguments_to_yielder_function() -> anyhow::Result<()> {
    let code = r#"
class Int
  def foo(i)
    yield self, i
  end
end

3.foo(2) do |x, i|
  x + i
end
"#;
    assert_eq!(run_int(code)?, 5);
    Ok(())
}

#[test]
fn block_reads_caller_locals() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

x = 1
foo do
  x + 1
end
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn yielder_reads_instance_vars() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def initialize
    @x = 1
  end

  def foo
    yield @x
  end
end

Foo.new.foo do |x|
  x + 1
end
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn yielder_sets_instance_vars_from_block_value() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def initialize
    @x = 1
  end

  def foo
    @x = yield
  end

  def value
    @x
  end
end

a = Foo.new
a.foo { 2 }
a.value
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn yielder_uses_instance_methods() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def foo
    yield value
  end

  def value
    1
  end
end

Foo.new.foo { |x| x + 1 }
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn block_calls_top_level_functions_when_yielder_is_an_instance_method() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def foo
    yield
  end
end

def bar
  1
end

Foo.new.foo { bar }
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn nested_yields() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
end

def foo
  bar { yield }
end

a = foo { 1 }
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn yielder_reads_global_constant() -> anyhow::Result<()> {
    let code = r#"
FOO = 1
def foo
  yield
  FOO
end
foo { }
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn return_from_yielder_function_ends_only_that_call() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  return 1
end

foo { }
2
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn return_from_block_leaves_the_defining_method() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

def bar
  foo { return 1 }
  2
end

bar
"#;
    assert_eq!(run_int(code)?, 1);
    assert_eq!(compile(code)?.result_type(), Some(&Type::int()));
    Ok(())
}

#[test]
fn conditional_return_from_yielder_function() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  return 1 if true
  return 2
end

def bar
  foo {}
end

bar
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn yielder_result_is_the_union_of_its_assignments() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  a = 1.1
  a = 1
  a
end

foo {}
"#;
    let compilation = compile(code)?;
    assert_eq!(
        compilation.result_type(),
        Some(&Type::int().union_with(&Type::float()))
    );
    assert_eq!(run_int(&code.replace("foo {}\n", "foo {}.to_i\n"))?, 1);
    Ok(())
}

#[test]
fn returns_in_both_ternary_branches() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  true ? return 1 : return 1.1
end

foo {}.to_i
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn return_from_block_in_yielder_called_inside_if() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
  2
end

def foo
  if true
    bar { return 1 }
  else
    0
  end
end

foo
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn return_from_block_in_conditionally_yielding_function() -> anyhow::Result<()> {
    let code = r#"
def bar
  if true
    yield
  end
end

def foo
  bar { return 1 }
  2
end

foo
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn calls_block_from_dispatch() -> anyhow::Result<()> {
    let code = r#"
def bar(y)
  yield y
end

def foo
  x = 1.1
  x = 1
  bar(x) { |z| z }
end

foo.to_i
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn calls_block_from_dispatch_and_uses_local_vars() -> anyhow::Result<()> {
    let code = r#"
def bar(y)
  yield y
end

def foo
  total = 0
  x = 1.5
  bar(x) { |z| total += z }
  x = 1
  bar(x) { |z| total += z }
  x = 1.5
  bar(x) { |z| total += z }
  total
end

foo.to_i
"#;
    assert_eq!(run_int(code)?, 4);
    Ok(())
}

#[test]
fn break_without_value_returns_nil() -> anyhow::Result<()> {
    let code = r#"
require "nil"

def foo
  yield
  1
end

x = foo do
  break if true
end
"#;
    assert_eq!(
        compile(code)?.result_type(),
        Some(&Type::int().union_with(&Type::nil()))
    );
    assert_eq!(run(&format!("{code}\nx.nil?"))?, Value::Bool(true));
    Ok(())
}

#[test]
fn break_ends_prelude_times() -> anyhow::Result<()> {
    let code = r#"
a = 0
10.times do
  a += 1
  break if a > 5
end
a
"#;
    assert_eq!(run_int(code)?, 6);
    Ok(())
}

#[test]
fn break_with_value_from_times() -> anyhow::Result<()> {
    assert_eq!(run_int("10.times { break 20 }")?, 20);
    Ok(())
}

#[test]
fn break_from_block_returns_from_yielder() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  yield
end

a = 0
foo { a += 1; break }
a
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn break_with_value_out_of_infinite_loop() -> anyhow::Result<()> {
    let code = r#"
def foo
  while true
    yield
    a = 3
  end
end

foo do
  break 1
end
"#;
    assert_eq!(run_int(code)?, 1);
    assert_eq!(compile(code)?.result_type(), Some(&Type::int()));
    Ok(())
}

#[test]
fn return_from_block_out_of_infinite_loop() -> anyhow::Result<()> {
    let code = r#"
require "nil"

def foo
  while true
    yield
    a = 3
  end
end

def bar
  foo do
    return 1
  end
end

bar.to_i
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn code_after_always_breaking_loop_is_excluded() -> anyhow::Result<()> {
    let code = r#"
def foo
  while true
    yield
  end
  1.5
end

foo do
  break 2
end
"#;
    let compilation = compile(code)?;
    assert_eq!(compilation.result_type(), Some(&Type::int()));
    assert!(!compilation.ir_json()?.contains("1.5"));
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn call_is_dropped_when_an_argument_always_breaks() -> anyhow::Result<()> {
    let code = r#"
require "nil"

def foo
  1 + yield
end

foo { break 2 }.to_i
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn nested_return_escapes_both_yielders() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
  a = 1
end

def foo
  bar { yield }
end

def z
  foo { return 2 }
end

z
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn nested_break_ends_the_outer_call() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
  a = 1
end

def foo
  bar { yield }
end

foo { break 2 }
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn break_through_argument_that_yields() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
  a = 2
end

def foo
  bar { 1 + yield }
end

foo { break 3 }
"#;
    assert_eq!(run_int(code)?, 3);
    Ok(())
}

#[test]
fn break_with_and_without_value_from_nilable_yielder() -> anyhow::Result<()> {
    let without_value = r#"
require "reference"

def foo
  yield
  ""
end

a = foo do
  break
end

a.nil?
"#;
    assert_eq!(run(without_value)?, Value::Bool(true));

    let with_value = r#"
def foo
  yield
  ""
end

a = foo do
  break if false
  break ""
end

a.nil?
"#;
    assert_eq!(run(with_value)?, Value::Bool(false));
    Ok(())
}

#[test]
fn block_sees_its_definers_self_inside_dispatch() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def do; yield; end
end
class Bar < Foo
end

class Int
  def foo
    x = Foo.new
    x = Bar.new
    x.do { $x = self }
  end
end

123.foo
$x.to_i
"#;
    assert_eq!(run_int(code)?, 123);
    Ok(())
}

#[test]
fn return_from_block_called_from_dispatch() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def do; yield; end
end
class Bar < Foo
end

def foo
  x = Foo.new
  x = Bar.new
  x.do { return 1 }
  0
end

foo
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn loop_break_in_function_called_from_block() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

def bar
  while true
    break 1
  end
  2
end

foo do
  bar
end
"#;
    assert_eq!(run_int(code)?, 2);
    Ok(())
}

#[test]
fn block_may_reassign_its_parameters() -> anyhow::Result<()> {
    let literal = r#"
def foo
  yield 1
end

foo { |x| x = 2; x }
"#;
    assert_eq!(run_int(literal)?, 2);

    let variable = r#"
def foo
  a = 1
  yield a
  a
end

foo { |x| x = 2; x }
"#;
    assert_eq!(run_int(variable)?, 1);
    Ok(())
}

#[test]
fn yields_nil_from_another_overload() -> anyhow::Result<()> {
    let code = r#"
def foo(key, default)
  foo(key) { default }
end

def foo(key)
  if !(true)
    return yield key
  end
  yield key
end

foo(1, nil)
"#;
    assert_eq!(compile(code)?.result_type(), Some(&Type::nil()));
    assert_eq!(run(code)?, Value::Nil);
    Ok(())
}

#[test]
fn yields_from_dispatch_call() -> anyhow::Result<()> {
    let code = r#"
def foo(x : Value)
  yield 1
end

def foo(x : Int)
  yield 2
end

def bar
  a = 1; a = 1.1
  foo(a) do |i|
    yield i
  end
end

x = 0
bar { |i| x = i }
x
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn blocks_with_nilable_yielder_results() -> anyhow::Result<()> {
    let code = r#"
class Foo
  def foo
    yield 1
    nil
  end
end

class Bar
  def foo
    yield 2
    Reference.new
  end
end

a = Foo.new || Bar.new
a.foo {}
"#;
    assert_eq!(run(code)?, Value::Nil);
    Ok(())
}

#[test]
fn missing_yield_arguments_are_nil() -> anyhow::Result<()> {
    let code = r#"
require "nil"

def foo
  yield 1
end

a = 0
foo do |x, y|
  a += x + y.to_i
end
a
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn extra_yield_arguments_are_ignored() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield 1, 2
end

foo { |x| x }
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn if_with_call_with_block() -> anyhow::Result<()> {
    let code = r#"
def bar
  yield
end

def foo
  if 1 == 2
    bar do
      x = 1
    end
  else
    3
  end
end

foo
"#;
    assert_eq!(run_int(code)?, 3);
    Ok(())
}

#[test]
fn block_calling_no_return_extern_is_never() -> anyhow::Result<()> {
    let code = r#"
lib C
  fun exit : NoReturn
end

def foo(key)
  foo(key) { C.exit }
end

def foo(key)
  if 1 == 1
    return 2
  end
  yield
end

foo 1
"#;
    assert_eq!(run_int(code)?, 2);
    assert_eq!(compile(code)?.result_type(), Some(&Type::int()));
    Ok(())
}

#[test]
fn while_break_inside_block_ends_only_the_loop() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  10
end

foo do
  while true
    break
  end
  1
end
"#;
    assert_eq!(run_int(code)?, 10);
    Ok(())
}

#[test]
fn block_break_inside_while_ends_only_the_call() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
  10
end

a = 0
while a < 5
  a += 1
  foo { break }
end
a
"#;
    assert_eq!(run_int(code)?, 5);
    Ok(())
}

#[test]
fn block_with_union_arg() -> anyhow::Result<()> {
    let code = r#"
class Number
  def abs
    self
  end
end

class Foo(T)
  def initialize(x : T)
    @x = x
  end

  def each
    yield @x
  end
end

a = Foo.new(1) || Foo.new(1.5)
a.each do |x|
  x.abs
end.to_i
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn block_with_hierarchy_type_arg() -> anyhow::Result<()> {
    let code = r#"
class Var(T)
  def initialize(x : T)
    @x = x
  end

  def each
    yield @x
  end
end

class Foo
  def bar
    1
  end
end

class Bar < Foo
  def bar
    2
  end
end

a = Var.new(Foo.new) || Var.new(Bar.new)
a.each do |x|
  x.bar
end
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn blocks_of_different_types_without_args() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

foo { 1.1 }
foo { 1 }
"#;
    assert_eq!(run_int(code)?, 1);
    Ok(())
}

#[test]
fn captured_mutation_is_visible_after_the_call() -> anyhow::Result<()> {
    let code = r#"
def foo
  yield
end

a = 1
foo { a = 5 }
a
"#;
    let compilation = compile(code)?;
    let a = compilation.program.main.local("a").expect("local a");
    assert!(a.captured);
    assert_eq!(run_int(code)?, 5);
    Ok(())
}

#[test]
fn local_assigned_on_one_branch_may_be_nil() -> anyhow::Result<()> {
    let one_branch = r#"
if 1 > 2
  x = 1
end
x
"#;
    assert_eq!(
        compile(one_branch)?.result_type(),
        Some(&Type::int().union_with(&Type::nil()))
    );
    assert_eq!(run(one_branch)?, Value::Nil);

    let both_branches = r#"
if 1 > 2
  x = 1
else
  x = 2
end
x
"#;
    assert_eq!(compile(both_branches)?.result_type(), Some(&Type::int()));
    assert_eq!(run_int(both_branches)?, 2);
    Ok(())
}

#[test]
fn block_locals_start_nil_on_every_yield() -> anyhow::Result<()> {
    let code = r#"
require "nil"

def twice
  yield 0
  yield 1
end

r = 0
twice do |i|
  if i == 0
    x = 5
  end
  r = x
end
r.nil?
"#;
    assert_eq!(run(code)?, Value::Bool(true));
    Ok(())
}

#[test]
fn yielder_locals_start_nil_on_every_call() -> anyhow::Result<()> {
    let code = r#"
def once
  if $first
    x = 1
  end
  yield
  x
end

$first = true
n = 0
r = 0
while n < 2
  r = once { }
  $first = false
  n += 1
end
r.nil?
"#;
    assert_eq!(run(code)?, Value::Bool(true));
    Ok(())
}
