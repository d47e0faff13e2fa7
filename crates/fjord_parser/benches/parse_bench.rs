use bumpalo::Bump;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fjord_ast::name::Names;
use fjord_parser::{Parser, ParserOptions};

// A medium-size Fjord source with a representative mix of constructs.
const FJORD_SOURCE: &str = r#"
package demo.users

import collections.{Map, Seq => Sequence, _}

case class User(id: Long, name: String, email: String, age: Int)

trait Repository[K, V] {
  def get(key: K): Option[V]
  def put(key: K, value: V): Unit
  def all: Sequence[V]
}

class UserService[R <: Repository[Long, User]](repo: R) {
  private var nextId: Long = 0L

  def create(name: String, email: String, age: Int): User = {
    nextId = nextId + 1
    val user = User(nextId, name, email, age)
    repo.put(user.id, user)
    user
  }

  def adults: Sequence[User] =
    for (u <- repo.all if u.age >= 18) yield u

  def describe(u: User): String =
    s"user ${u.name} <${u.email}>"

  def findOrFail(id: Long): User =
    repo.get(id) match {
      case Some(u) => u
      case None    => throw new NoSuchElementException
    }
}

object Main {
  def main(args: Array[String]): Unit = {
    val service = new UserService(new InMemoryRepo)
    val (first, second) = (service.create("a", "a@x", 30), service.create("b", "b@x", 12))
    val names = List(first, second).map(_.name)
    var count = 0
    while (count < names.length) {
      println(names(count))
      count = count + 1
    }
    try service.findOrFail(99L)
    catch { case e: Throwable => println(e) }
  }
}
"#;

fn bench_parse_fjord(c: &mut Criterion) {
    c.bench_function("parse_fjord_medium", |b| {
        b.iter(|| {
            let arena = Bump::new();
            let names = Names::new();
            let mut parser = Parser::new(
                &arena,
                &names,
                "bench.fj",
                black_box(FJORD_SOURCE),
                ParserOptions::default(),
            );
            let unit = parser.parse();
            black_box(&unit);
        });
    });
}

criterion_group!(benches, bench_parse_fjord);
criterion_main!(benches);
