/// Source analyzed ahead of every program.
pub const PRELUDE: &str = r#"
class Int
  def times
    i = 0
    while i < self
      yield i
      i += 1
    end
    self
  end

  def upto(n)
    i = self
    while i <= n
      yield i
      i += 1
    end
    self
  end
end
"#;
